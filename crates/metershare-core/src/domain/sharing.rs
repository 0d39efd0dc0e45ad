//! Sharing profiles and the disclosure policy table
//!
//! A [`SharingProfile`] is the user-facing privacy setting; its
//! [`SharingPolicy`] is the fixed disclosure-behavior record the rollup
//! builder consults. The mapping is an exhaustive static match: adding a
//! sixth profile without a policy row is a compile error, not a runtime
//! surprise.

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Named privacy profile controlling what a rollup row discloses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SharingProfile {
    /// Nothing is uploaded at all
    Off,
    /// Full-fidelity rows, visible only to their author
    SoloFull,
    /// Team rows with hashed dimensions and no user id
    TeamAnonymized,
    /// Team rows with hashed dimensions and a pseudonymous user id
    TeamPseudonymous,
    /// Team rows with raw dimensions, names, and a user id
    TeamIdentified,
}

/// Fixed disclosure behavior for one profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharingPolicy {
    /// Whether emitted rows may carry a user id
    pub include_user_id: bool,
    /// Whether workspace and machine ids are replaced by salted hashes
    pub hash_workspace_machine: bool,
    /// Whether human-readable workspace/machine names may be attached
    /// (additionally gated on a recorded consent timestamp)
    pub include_names: bool,
}

impl SharingProfile {
    /// The disclosure policy for this profile
    ///
    /// Exhaustively defined for all five profiles; a missing case is a
    /// programming error caught by the compiler.
    #[must_use]
    pub const fn policy(self) -> SharingPolicy {
        match self {
            Self::Off => SharingPolicy {
                include_user_id: false,
                hash_workspace_machine: true,
                include_names: false,
            },
            Self::SoloFull => SharingPolicy {
                include_user_id: true,
                hash_workspace_machine: false,
                include_names: true,
            },
            Self::TeamAnonymized => SharingPolicy {
                include_user_id: false,
                hash_workspace_machine: true,
                include_names: false,
            },
            Self::TeamPseudonymous => SharingPolicy {
                include_user_id: true,
                hash_workspace_machine: true,
                include_names: false,
            },
            Self::TeamIdentified => SharingPolicy {
                include_user_id: true,
                hash_workspace_machine: false,
                include_names: true,
            },
        }
    }

    /// Relative disclosure ordering used by the consent gate
    #[must_use]
    pub const fn disclosure_rank(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::SoloFull => 1,
            Self::TeamAnonymized => 2,
            Self::TeamPseudonymous => 3,
            Self::TeamIdentified => 4,
        }
    }

    /// Whether rows computed under this profile are uploaded at all
    #[must_use]
    pub const fn uploads_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Whether uploaded rows are visible to the whole team
    #[must_use]
    pub const fn shares_with_team(self) -> Option<bool> {
        match self {
            Self::Off => None,
            Self::SoloFull => Some(false),
            Self::TeamAnonymized | Self::TeamPseudonymous | Self::TeamIdentified => Some(true),
        }
    }

    /// Configuration / display name (camelCase, matching the wire enum)
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::SoloFull => "soloFull",
            Self::TeamAnonymized => "teamAnonymized",
            Self::TeamPseudonymous => "teamPseudonymous",
            Self::TeamIdentified => "teamIdentified",
        }
    }

    /// Validates a transition from `current` to `self`.
    ///
    /// Moving to a more disclosive profile requires an explicit consent
    /// timestamp recorded before the next sync applies it. Moving to a
    /// less (or equally) disclosive profile takes effect immediately and
    /// never needs confirmation; history is unaffected either way.
    pub fn validate_transition(
        self,
        current: SharingProfile,
        has_consent: bool,
    ) -> Result<(), DomainError> {
        if self.disclosure_rank() > current.disclosure_rank() && !has_consent {
            return Err(DomainError::ConsentRequired {
                from: current.as_str().to_string(),
                to: self.as_str().to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SharingProfile {
    fn default() -> Self {
        Self::Off
    }
}
