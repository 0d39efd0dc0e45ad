//! Canary permission probe
//!
//! Validates a credential against the target table by writing and then
//! deleting a throwaway canary entity. A denial on the write step and a
//! denial on the delete step are classified distinctly, so the caller
//! can report the exact missing role instead of a generic failure. All
//! diagnostic text is redacted before it leaves this module.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use metershare_core::domain::aggregate::{UsageAggregateRow, SCHEMA_VERSION_LEGACY};
use metershare_core::domain::newtypes::DatasetId;
use metershare_core::ports::credential::{
    AuthMode, ICredentialProvider, ICredentialValidator, ProbeReport,
};
use metershare_core::ports::table_store::{ITableStore, StoreError, StoreOperation};

use crate::redact::redact;

/// Validates credentials and table permissions with a canary entity
pub struct CredentialValidator {
    provider: Arc<dyn ICredentialProvider>,
    store: Arc<dyn ITableStore>,
    auth_mode: AuthMode,
    dataset_id: DatasetId,
}

impl CredentialValidator {
    /// Creates a validator over the given provider and store
    pub fn new(
        provider: Arc<dyn ICredentialProvider>,
        store: Arc<dyn ITableStore>,
        auth_mode: AuthMode,
        dataset_id: DatasetId,
    ) -> Self {
        Self {
            provider,
            store,
            auth_mode,
            dataset_id,
        }
    }

    /// Canary entity in a reserved partition outside every day-partition
    /// shape, so probes can never collide with rollup rows.
    fn canary_row(&self) -> UsageAggregateRow {
        let now = Utc::now();
        UsageAggregateRow {
            partition_key: format!("{}__probe", self.dataset_id.as_str()),
            row_key: Uuid::new_v4().simple().to_string(),
            schema_version: SCHEMA_VERSION_LEGACY,
            dataset_id: self.dataset_id.as_str().to_string(),
            day: now.date_naive(),
            model: "canary".to_string(),
            workspace_id: "probe".to_string(),
            workspace_name: None,
            machine_id: "probe".to_string(),
            machine_name: None,
            user_id: None,
            user_key_type: None,
            input_tokens: 0,
            output_tokens: 0,
            interactions: 0,
            share_with_team: None,
            consent_at: None,
            updated_at: now,
        }
    }
}

#[async_trait::async_trait]
impl ICredentialValidator for CredentialValidator {
    /// Probes write and delete permission, failing fast on the first
    /// step that is denied.
    async fn probe(&self) -> Result<ProbeReport, StoreError> {
        // Step 1: the credential itself must resolve.
        self.provider
            .get_credential(self.auth_mode)
            .await
            .map_err(redact_error)?;

        // Step 2: canary write.
        let canary = self.canary_row();
        debug!(partition = %canary.partition_key, "Probing write permission");
        self.store
            .upsert_batch(std::slice::from_ref(&canary))
            .await
            .map_err(|err| with_remediation(redact_error(err)))?;

        // Step 3: canary delete.
        debug!(partition = %canary.partition_key, "Probing delete permission");
        let filter = format!("RowKey eq '{}'", canary.row_key);
        self.store
            .delete_where(&canary.partition_key, &filter)
            .await
            .map_err(|err| with_remediation(redact_error(err)))?;

        info!(auth_mode = self.auth_mode.as_str(), "Credential probe succeeded");
        Ok(ProbeReport {
            auth_mode: self.auth_mode,
            can_write: true,
            can_delete: true,
        })
    }
}

/// Runs the textual payload of a store error through redaction
fn redact_error(err: StoreError) -> StoreError {
    match err {
        StoreError::Auth(detail) => StoreError::Auth(redact(&detail)),
        StoreError::PermissionDenied { operation, detail } => StoreError::PermissionDenied {
            operation,
            detail: redact(&detail),
        },
        StoreError::Network(detail) => StoreError::Network(redact(&detail)),
        StoreError::Http { status, detail } => StoreError::Http {
            status,
            detail: redact(&detail),
        },
        other => other,
    }
}

/// Appends the exact remediation for a permission denial
fn with_remediation(err: StoreError) -> StoreError {
    match err {
        StoreError::PermissionDenied {
            operation: StoreOperation::Write,
            detail,
        } => StoreError::PermissionDenied {
            operation: StoreOperation::Write,
            detail: format!(
                "{detail} (missing write role: assign 'Storage Table Data Contributor' on the table)"
            ),
        },
        StoreError::PermissionDenied {
            operation: StoreOperation::Delete,
            detail,
        } => StoreError::PermissionDenied {
            operation: StoreOperation::Delete,
            detail: format!(
                "{detail} (missing delete role: the assigned role allows writes but not deletes)"
            ),
        },
        other => other,
    }
}
