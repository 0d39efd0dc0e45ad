//! Credential resolution for the table service
//!
//! ## Components
//!
//! - [`CredentialChain`] - resolves an Entra bearer token from the
//!   ambient environment in a fixed priority order: stored interactive
//!   login session, then managed identity, then environment variables.
//!   Nothing along the chain persists a secret.
//! - [`SharedKeyStore`] - stores and retrieves the storage account key
//!   from the OS credential store (e.g., GNOME Keyring, KDE Wallet).
//!   The key never appears in exported or synced configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use metershare_core::ports::credential::{AuthMode, Credential, ICredentialProvider};
use metershare_core::ports::table_store::StoreError;

use crate::redact::redact;

/// Keyring service name for stored secrets
const KEYRING_SERVICE: &str = "metershare";

/// Managed identity metadata endpoint
const IMDS_TOKEN_URL: &str =
    "http://169.254.169.254/metadata/identity/oauth2/token?api-version=2018-02-01&resource=https://storage.azure.com/";

/// Scope requested by the client-credential flow
const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

/// Timeout for the link-local metadata endpoint; off-cloud machines
/// should fall through the chain quickly
const IMDS_TIMEOUT: Duration = Duration::from_secs(2);

/// A previously stored interactive login token
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Token endpoint response shape (both Entra and IMDS)
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Resolves credentials from the ambient environment
pub struct CredentialChain {
    account: String,
    http: reqwest::Client,
}

impl CredentialChain {
    /// Creates a chain for the given storage account
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Stored interactive login session, skipped when expired
    fn try_stored_login(&self) -> Option<Credential> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{}:entra", self.account)).ok()?;
        let json = match entry.get_password() {
            Ok(json) => json,
            Err(keyring::Error::NoEntry) => return None,
            Err(err) => {
                warn!(%err, "Failed to read stored login token");
                return None;
            }
        };
        let stored: StoredToken = serde_json::from_str(&json).ok()?;
        if stored.expires_at <= Utc::now() {
            debug!("Stored login token expired, trying next credential source");
            return None;
        }
        debug!("Using stored interactive login token");
        Some(Credential::Bearer {
            token: stored.access_token,
            expires_at: Some(stored.expires_at),
        })
    }

    /// Managed identity via the instance metadata endpoint
    async fn try_managed_identity(&self) -> Option<Credential> {
        let response = self
            .http
            .get(IMDS_TOKEN_URL)
            .header("Metadata", "true")
            .timeout(IMDS_TIMEOUT)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let token: TokenResponse = response.json().await.ok()?;
        debug!("Using managed identity token");
        Some(Credential::Bearer {
            token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64)),
        })
    }

    /// Client-credential flow from environment variables
    ///
    /// Returns `Ok(None)` when the variables are absent (fall through);
    /// a present-but-failing configuration is a real auth error.
    async fn try_environment(&self) -> Result<Option<Credential>, StoreError> {
        let (Ok(tenant), Ok(client_id), Ok(client_secret)) = (
            std::env::var("AZURE_TENANT_ID"),
            std::env::var("AZURE_CLIENT_ID"),
            std::env::var("AZURE_CLIENT_SECRET"),
        ) else {
            return Ok(None);
        };

        let url = format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("scope", STORAGE_SCOPE),
        ];

        let response = self
            .http
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| StoreError::Auth(redact(&format!("token request failed: {e}"))))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(redact(&format!(
                "environment credential rejected (HTTP {status}): {body}"
            ))));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Auth(redact(&format!("malformed token response: {e}"))))?;

        debug!("Using environment client-credential token");
        Ok(Some(Credential::Bearer {
            token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64)),
        }))
    }
}

#[async_trait::async_trait]
impl ICredentialProvider for CredentialChain {
    async fn get_credential(&self, mode: AuthMode) -> Result<Credential, StoreError> {
        match mode {
            AuthMode::EntraId => {
                if let Some(credential) = self.try_stored_login() {
                    return Ok(credential);
                }
                if let Some(credential) = self.try_managed_identity().await {
                    return Ok(credential);
                }
                if let Some(credential) = self.try_environment().await? {
                    return Ok(credential);
                }
                Err(StoreError::Auth(
                    "no Entra credential available: sign in interactively, enable a managed \
                     identity, or set AZURE_TENANT_ID / AZURE_CLIENT_ID / AZURE_CLIENT_SECRET"
                        .to_string(),
                ))
            }
            AuthMode::SharedKey => match SharedKeyStore::load(&self.account) {
                Ok(Some(key)) => Ok(Credential::SharedKey {
                    account: self.account.clone(),
                    key,
                }),
                Ok(None) => Err(StoreError::Auth(format!(
                    "no stored account key for {:?}: run the setup wizard to store one",
                    self.account
                ))),
                Err(err) => Err(StoreError::Auth(redact(&format!(
                    "failed to read the account key from the secure store: {err}"
                )))),
            },
        }
    }
}

/// Stores the storage account key in the per-machine secure store
pub struct SharedKeyStore;

impl SharedKeyStore {
    fn entry(account: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(KEYRING_SERVICE, &format!("{account}:shared-key"))
            .context("Failed to create keyring entry")
    }

    /// Stores the account key for the given storage account
    pub fn store(account: &str, key: &str) -> Result<()> {
        Self::entry(account)?
            .set_password(key)
            .context("Failed to store account key in keyring")?;
        info!(account, "Stored account key in keyring");
        Ok(())
    }

    /// Loads the account key, or `None` when nothing is stored
    pub fn load(account: &str) -> Result<Option<String>> {
        match Self::entry(account)?.get_password() {
            Ok(key) => Ok(Some(key)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read from keyring")),
        }
    }

    /// Removes the stored account key
    pub fn clear(account: &str) -> Result<()> {
        match Self::entry(account)?.delete_credential() {
            Ok(()) => {
                info!(account, "Cleared account key from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to delete from keyring")),
        }
    }
}
