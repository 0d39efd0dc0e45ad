//! Configuration module for Metershare.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, saving, validation, and defaults. Secrets are never
//! part of this payload: the shared-key credential lives in the OS keyring
//! and Entra tokens are resolved from the ambient environment.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;
use crate::domain::identity::IdentityMode;
use crate::domain::newtypes::DatasetId;
use crate::domain::sharing::SharingProfile;
use crate::ports::credential::AuthMode;

/// Smallest accepted lookback window, in days
pub const LOOKBACK_DAYS_MIN: u32 = 1;

/// Largest accepted lookback window, in days
pub const LOOKBACK_DAYS_MAX: u32 = 365;

/// Top-level configuration for Metershare.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub sharing: SharingConfig,
    pub table: TableConfig,
    pub logging: LoggingConfig,
}

/// Rollup and disclosure settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharingConfig {
    /// Dataset all rollups from this installation belong to.
    pub dataset_id: String,
    /// How many days of session files feed each rollup cycle (1-365).
    pub lookback_days: u32,
    /// Active privacy profile.
    pub profile: SharingProfile,
    /// How the user id on emitted rows is derived.
    pub identity_mode: IdentityMode,
    /// When the user last consented to the active (or a more disclosive)
    /// profile. Required before a sync applies a raised profile.
    pub consent_at: Option<DateTime<Utc>>,
}

/// Remote table store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Storage account name.
    pub storage_account: String,
    /// Table name within the account.
    pub table_name: String,
    /// Credential source: `entraId` or `sharedKey`.
    pub auth_mode: AuthMode,
    /// Full service endpoint override (primarily for tests); when unset
    /// the endpoint is derived from the storage account name.
    pub endpoint_override: Option<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Path to the log file.
    pub file: PathBuf,
}

/// Locally observed dimensions and ambient identity inputs.
///
/// Supplied by the host application per process; never persisted in the
/// configuration file.
#[derive(Debug, Clone, Default)]
pub struct LocalContext {
    pub workspace_id: String,
    pub workspace_name: Option<String>,
    pub machine_id: String,
    pub machine_name: Option<String>,
    pub tenant_id: Option<String>,
    pub object_id: Option<String>,
    pub team_alias: Option<String>,
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Persist the configuration as YAML at `path`, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/metershare/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("metershare")
            .join("config.yaml")
    }

    /// Validate the configuration, returning the first violation found.
    pub fn validate(&self) -> Result<(), DomainError> {
        DatasetId::new(self.sharing.dataset_id.clone())?;
        if !(LOOKBACK_DAYS_MIN..=LOOKBACK_DAYS_MAX).contains(&self.sharing.lookback_days) {
            return Err(DomainError::InvalidConfig(format!(
                "lookback_days must be between {LOOKBACK_DAYS_MIN} and {LOOKBACK_DAYS_MAX}, got {}",
                self.sharing.lookback_days
            )));
        }
        validate_table_name(&self.table.table_name)?;
        if self.table.storage_account.is_empty() {
            return Err(DomainError::InvalidConfig(
                "storage_account must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The validated dataset id.
    pub fn dataset_id(&self) -> Result<DatasetId, DomainError> {
        DatasetId::new(self.sharing.dataset_id.clone())
    }
}

/// Table names: 3-63 characters, alphanumeric, starting with a letter.
fn validate_table_name(name: &str) -> Result<(), DomainError> {
    let ok = (3..=63).contains(&name.len())
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric());
    if !ok {
        return Err(DomainError::InvalidConfig(format!(
            "table_name must be 3-63 alphanumeric characters starting with a letter, got {name:?}"
        )));
    }
    Ok(())
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            dataset_id: "default".to_string(),
            lookback_days: 30,
            profile: SharingProfile::Off,
            identity_mode: IdentityMode::None,
            consent_at: None,
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            storage_account: String::new(),
            table_name: "usagerollups".to_string(),
            auth_mode: AuthMode::EntraId,
            endpoint_override: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("metershare")
                .join("metershare.log"),
        }
    }
}
