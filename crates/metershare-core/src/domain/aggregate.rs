//! Daily usage aggregate rows and their compound keys
//!
//! A [`UsageAggregateRow`] is one day × model × workspace × machine ×
//! (optional) user. The partition key co-locates one day of one dataset;
//! the row key is a stable hash of the remaining dimension tuple. Because
//! both keys are pure functions of the dimensions, re-uploading the same
//! locally recomputed totals replaces the remote row instead of
//! double-counting it — the invariant the whole multi-machine
//! convergence story rests on.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::newtypes::DatasetId;

/// Schema version 1: legacy rows without a user id
pub const SCHEMA_VERSION_LEGACY: u8 = 1;

/// Schema version 2: rows carrying a user id
pub const SCHEMA_VERSION_USER: u8 = 2;

/// Schema version 3: rows carrying a user id plus consent metadata
pub const SCHEMA_VERSION_CONSENT: u8 = 3;

/// Length of the truncated row-key hash, in hex characters
const ROW_KEY_HEX_LEN: usize = 32;

/// How the `user_id` on a row was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserKeyType {
    /// Salted, truncated hash of the provider identity
    Pseudonymous,
    /// User-chosen team alias that passed PII-avoidance validation
    TeamAlias,
    /// Provider-issued object id, verbatim
    EntraObjectId,
}

impl UserKeyType {
    /// Wire representation used in table entities
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pseudonymous => "pseudonymous",
            Self::TeamAlias => "teamAlias",
            Self::EntraObjectId => "entraObjectId",
        }
    }

    /// Parse the wire representation
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pseudonymous" => Some(Self::Pseudonymous),
            "teamAlias" => Some(Self::TeamAlias),
            "entraObjectId" => Some(Self::EntraObjectId),
            _ => None,
        }
    }
}

/// One pre-aggregated daily usage row
///
/// `(partition_key, row_key)` uniquely identifies one dimension tuple per
/// day. Rows are always written as full replacements of a freshly
/// recomputed daily total; nothing ever increments a remote row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageAggregateRow {
    /// `{dataset_id}_{YYYY-MM-DD}`
    pub partition_key: String,
    /// Truncated SHA-256 of the dimension tuple
    pub row_key: String,
    /// Entity schema version (1 legacy, 2 with user id, 3 with consent)
    pub schema_version: u8,
    pub dataset_id: String,
    pub day: NaiveDate,
    pub model: String,
    pub workspace_id: String,
    pub workspace_name: Option<String>,
    pub machine_id: String,
    pub machine_name: Option<String>,
    pub user_id: Option<String>,
    pub user_key_type: Option<UserKeyType>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub interactions: u64,
    pub share_with_team: Option<bool>,
    pub consent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UsageAggregateRow {
    /// Builds the partition key for one dataset-day
    #[must_use]
    pub fn partition_key_for(dataset_id: &DatasetId, day: NaiveDate) -> String {
        format!("{}_{}", dataset_id.as_str(), day.format("%Y-%m-%d"))
    }

    /// Builds the stable row key for a dimension tuple
    ///
    /// The hash covers `(model, workspace_id, machine_id, user_id)` with a
    /// separator byte between parts, so distinct tuples can never collide
    /// by concatenation. Identical tuples always produce identical keys,
    /// on every machine.
    #[must_use]
    pub fn row_key_for(
        model: &str,
        workspace_id: &str,
        machine_id: &str,
        user_id: Option<&str>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0x1f]);
        hasher.update(workspace_id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(machine_id.as_bytes());
        hasher.update([0x1f]);
        if let Some(user) = user_id {
            hasher.update(user.as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        digest[..ROW_KEY_HEX_LEN].to_string()
    }

    /// The schema version the row's populated fields require
    #[must_use]
    pub fn schema_version_for(
        user_id: Option<&str>,
        consent_at: Option<&DateTime<Utc>>,
    ) -> u8 {
        match (user_id, consent_at) {
            (None, _) => SCHEMA_VERSION_LEGACY,
            (Some(_), None) => SCHEMA_VERSION_USER,
            (Some(_), Some(_)) => SCHEMA_VERSION_CONSENT,
        }
    }

    /// Total tokens (input + output), saturating
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}
