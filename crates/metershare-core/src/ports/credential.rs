//! Credential ports (driven/secondary ports)
//!
//! Two capabilities: resolving an opaque credential from the ambient
//! environment, and probing that the credential actually holds the
//! write and delete roles on the target table. Both are traits so the
//! sync engine can be tested without any cloud dependency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::table_store::StoreError;

/// How this installation authenticates against the table store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMode {
    /// Entra ID token resolved from the ambient environment
    EntraId,
    /// Storage account key held in the per-machine secure store
    SharedKey,
}

impl AuthMode {
    /// Configuration / display name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntraId => "entraId",
            Self::SharedKey => "sharedKey",
        }
    }
}

/// A resolved credential, opaque to everything but the store adapter
#[derive(Clone)]
pub enum Credential {
    /// Bearer token for the table service resource
    Bearer {
        token: String,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Storage account name and base64 account key
    SharedKey { account: String, key: String },
}

// Secret material must never reach logs through a stray {:?}.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer { expires_at, .. } => f
                .debug_struct("Credential::Bearer")
                .field("token", &"<redacted>")
                .field("expires_at", expires_at)
                .finish(),
            Self::SharedKey { account, .. } => f
                .debug_struct("Credential::SharedKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
        }
    }
}

/// Port trait for resolving credentials from the ambient environment
///
/// Implementations must never persist a secret; the resolved value lives
/// only in memory for the duration of the cycle that requested it.
#[async_trait::async_trait]
pub trait ICredentialProvider: Send + Sync {
    /// Resolves a credential for `mode`, or a [`StoreError::Auth`] whose
    /// message carries actionable (already redacted) remediation text.
    async fn get_credential(&self, mode: AuthMode) -> Result<Credential, StoreError>;
}

/// Result of a successful permission probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// The auth mode that was probed
    pub auth_mode: AuthMode,
    /// Canary entity was written successfully
    pub can_write: bool,
    /// Canary entity was deleted successfully
    pub can_delete: bool,
}

/// Port trait for validating a credential against the target table
///
/// The probe writes then deletes a canary entity, classifying denials as
/// missing-write vs missing-delete so the caller can report the exact
/// remediation. It fails fast: the first failing step aborts the probe.
#[async_trait::async_trait]
pub trait ICredentialValidator: Send + Sync {
    async fn probe(&self) -> Result<ProbeReport, StoreError>;
}
