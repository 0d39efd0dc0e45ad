//! Metershare Facade - host-facing operations
//!
//! Composes the rollup builder, sync engine, query service, and table
//! store behind one surface the host application calls: setup, upload,
//! query, profile change, delete-my-data, and credential probe. Every
//! operation is async and returns a result value; nothing throws across
//! the boundary, and no failure here may crash the host.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use metershare_core::config::{Config, LocalContext};
use metershare_core::domain::newtypes::DatasetId;
use metershare_core::domain::sharing::SharingProfile;
use metershare_core::ports::clock::IClock;
use metershare_core::ports::credential::{ICredentialValidator, ProbeReport};
use metershare_core::ports::session_cache::{ISessionSource, ISessionStatsCache};
use metershare_core::ports::table_store::{ITableStore, StoreError};
use metershare_query::{AggregateResult, GroupDimension, QueryError, QueryFilters, QueryService};
use metershare_rollup::builder::{RollupBuilder, RollupParams};
use metershare_sync::{
    sync_interval, CycleError, CycleOutcome, CycleRequest, SyncEngine, SyncHandle, SyncScheduler,
};
use metershare_table::filter::eq_clause;
use metershare_table::redact::redact;

/// Day-partitions scanned by delete-my-data: strictly wider than the
/// maximum lookback window, so every partition this installation could
/// have written is covered.
const DELETE_SCAN_DAYS: i64 = 400;

/// Result of the external provisioning wizard; the facade only consumes
/// this record, the interactive resource-creation flow lives elsewhere.
#[derive(Debug, Clone)]
pub struct ProvisionedResources {
    pub subscription_id: String,
    pub resource_group: String,
    pub storage_account: String,
    pub table_name: String,
}

/// One partition that could not be cleaned during delete-my-data
#[derive(Debug, Clone)]
pub struct PartitionFailure {
    pub partition_key: String,
    /// Redacted error description
    pub error: String,
}

/// Outcome of a best-effort delete-my-data sweep
#[derive(Debug, Clone, Default)]
pub struct DeletionReport {
    pub partitions_scanned: usize,
    pub rows_deleted: u64,
    /// Partial permission failures are reported, never hidden
    pub failures: Vec<PartitionFailure>,
}

/// Adapters the facade composes; swap in fakes for tests
pub struct FacadeDeps {
    pub store: Arc<dyn ITableStore>,
    pub validator: Arc<dyn ICredentialValidator>,
    pub stats_cache: Arc<dyn ISessionStatsCache>,
    pub session_source: Arc<dyn ISessionSource>,
    pub clock: Arc<dyn IClock>,
}

/// Host-facing surface over the whole subsystem
pub struct Facade {
    config: RwLock<Config>,
    config_path: PathBuf,
    local: LocalContext,
    engine: SyncEngine,
    query: QueryService,
    store: Arc<dyn ITableStore>,
    validator: Arc<dyn ICredentialValidator>,
    session_source: Arc<dyn ISessionSource>,
    clock: Arc<dyn IClock>,
}

impl Facade {
    /// Composes the facade from a validated configuration and adapters
    pub fn new(
        config: Config,
        config_path: PathBuf,
        local: LocalContext,
        deps: FacadeDeps,
    ) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let dataset_id = config.dataset_id()?;

        let builder = RollupBuilder::new(deps.stats_cache, deps.clock.clone());
        let engine = SyncEngine::new(deps.validator.clone(), deps.store.clone(), builder);
        let query = QueryService::new(deps.store.clone(), dataset_id, deps.clock.clone());

        Ok(Self {
            config: RwLock::new(config),
            config_path,
            local,
            engine,
            query,
            store: deps.store,
            validator: deps.validator,
            session_source: deps.session_source,
            clock: deps.clock,
        })
    }

    fn config_snapshot(&self) -> Config {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Consumes the provisioning wizard's result and persists it.
    ///
    /// Any backend settings change invalidates the query cache
    /// unconditionally; the table client wiring picks the new settings
    /// up on the next composition.
    pub fn setup(&self, provisioned: &ProvisionedResources) -> Result<()> {
        info!(
            storage_account = %provisioned.storage_account,
            table = %provisioned.table_name,
            "Applying provisioned resources"
        );
        {
            let mut config = self.config.write().expect("config lock poisoned");
            config.table.storage_account = provisioned.storage_account.clone();
            config.table.table_name = provisioned.table_name.clone();
            config.validate().context("Provisioned settings invalid")?;
            config
                .save(&self.config_path)
                .context("Failed to persist configuration")?;
        }
        self.query.invalidate_cache();
        Ok(())
    }

    /// Runs one sync cycle now, subject to the single-in-flight guard.
    ///
    /// Never returns an error: failures degrade to a skipped cycle with
    /// a structured reason.
    pub async fn upload_rollups(&self) -> CycleOutcome {
        let request = match self.cycle_request().await {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "Could not assemble sync cycle request");
                return CycleOutcome::Failed(CycleError::Validation(err.to_string()));
            }
        };
        self.engine.run_cycle(&request).await
    }

    async fn cycle_request(&self) -> Result<CycleRequest> {
        let config = self.config_snapshot();
        let dataset_id = config.dataset_id()?;
        let files = self
            .session_source
            .session_files()
            .await
            .context("Failed to enumerate session files")?;

        Ok(CycleRequest {
            files,
            params: RollupParams {
                dataset_id,
                profile: config.sharing.profile,
                consent_at: config.sharing.consent_at,
                lookback_days: config.sharing.lookback_days,
                identity_mode: config.sharing.identity_mode,
                local: self.local.clone(),
            },
        })
    }

    /// Runs a filtered aggregate query through the cached query service
    pub async fn query_aggregates(
        &self,
        filters: &QueryFilters,
        group_by: GroupDimension,
    ) -> Result<AggregateResult, QueryError> {
        self.query.query(filters, group_by).await
    }

    /// Changes the sharing profile, enforcing the consent gate.
    ///
    /// Raising disclosure requires `consent_at`; lowering it takes
    /// effect immediately and only affects future rows.
    pub fn set_sharing_profile(
        &self,
        profile: SharingProfile,
        consent_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut config = self.config.write().expect("config lock poisoned");
        let current = config.sharing.profile;
        profile.validate_transition(current, consent_at.is_some())?;

        info!(
            from = current.as_str(),
            to = profile.as_str(),
            "Sharing profile changed"
        );
        config.sharing.profile = profile;
        if let Some(consent) = consent_at {
            config.sharing.consent_at = Some(consent);
        }
        config
            .save(&self.config_path)
            .context("Failed to persist configuration")?;
        Ok(())
    }

    /// Deletes every row carrying `user_id` across all day-partitions in
    /// the deletion scan window. Best-effort: partitions that deny the
    /// delete are reported in the result, not hidden, and do not stop
    /// the sweep.
    pub async fn delete_user_data(&self, user_id: &str) -> Result<DeletionReport, StoreError> {
        let filter = eq_clause("UserId", user_id)?;
        let config = self.config_snapshot();
        let dataset_id = config
            .dataset_id()
            .map_err(|e| StoreError::InvalidFilter(e.to_string()))?;

        let mut report = DeletionReport::default();
        let today = self.clock.now().date_naive();

        for offset in 0..DELETE_SCAN_DAYS {
            let day = today - Duration::days(offset);
            let partition_key = partition_key_for(&dataset_id, day);
            report.partitions_scanned += 1;

            match self.store.delete_where(&partition_key, &filter).await {
                Ok(deleted) => report.rows_deleted += deleted,
                Err(err) => {
                    warn!(partition = %partition_key, %err, "Delete sweep failed for partition");
                    report.failures.push(PartitionFailure {
                        partition_key,
                        error: redact(&err.to_string()),
                    });
                }
            }
        }

        info!(
            user = user_id,
            deleted = report.rows_deleted,
            failures = report.failures.len(),
            "Delete-my-data sweep finished"
        );
        Ok(report)
    }

    /// Probes the credential and table permissions without syncing
    pub async fn probe_credentials(&self) -> Result<ProbeReport, StoreError> {
        self.validator.probe().await
    }

    /// Builds the periodic scheduler for this installation's lookback
    /// window; the caller drives it with [`Facade::upload_rollups`]
    pub fn scheduler(&self) -> (SyncScheduler, SyncHandle) {
        let config = self.config_snapshot();
        SyncScheduler::new(sync_interval(config.sharing.lookback_days))
    }

    /// The active sharing profile
    pub fn sharing_profile(&self) -> SharingProfile {
        self.config_snapshot().sharing.profile
    }
}

fn partition_key_for(dataset_id: &DatasetId, day: chrono::NaiveDate) -> String {
    metershare_core::domain::aggregate::UsageAggregateRow::partition_key_for(dataset_id, day)
}
