//! Facade integration tests over in-memory port fakes

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use metershare_core::config::{Config, LocalContext};
use metershare_core::domain::aggregate::UsageAggregateRow;
use metershare_core::domain::errors::DomainError;
use metershare_core::domain::identity::IdentityMode;
use metershare_core::domain::newtypes::DatasetId;
use metershare_core::domain::sharing::SharingProfile;
use metershare_core::ports::clock::ManualClock;
use metershare_core::ports::credential::{AuthMode, ICredentialValidator, ProbeReport};
use metershare_core::ports::session_cache::{
    CachedLookup, ISessionSource, ISessionStatsCache, ModelTokens, SessionFile, SessionStats,
};
use metershare_core::ports::table_store::{ITableStore, StoreError, StoreOperation};
use metershare_facade::{Facade, FacadeDeps, ProvisionedResources};
use metershare_query::{GroupDimension, QueryFilters};
use metershare_sync::CycleOutcome;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct MemoryStore {
    rows: Mutex<HashMap<(String, String), UsageAggregateRow>>,
    /// Partitions that deny deletes, for partial-failure reporting
    deny_delete_partitions: Vec<String>,
}

impl MemoryStore {
    fn seed(&self, rows: Vec<UsageAggregateRow>) {
        let mut table = self.rows.lock().unwrap();
        for row in rows {
            table.insert((row.partition_key.clone(), row.row_key.clone()), row);
        }
    }

    fn remaining_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter_map(|row| row.user_id.clone())
            .collect();
        users.sort();
        users.dedup();
        users
    }
}

#[async_trait::async_trait]
impl ITableStore for MemoryStore {
    async fn upsert_batch(&self, rows: &[UsageAggregateRow]) -> Result<(), StoreError> {
        let mut table = self.rows.lock().unwrap();
        for row in rows {
            table.insert((row.partition_key.clone(), row.row_key.clone()), row.clone());
        }
        Ok(())
    }

    async fn query_partition(
        &self,
        partition_key: &str,
        _filter: Option<&str>,
    ) -> Result<Vec<UsageAggregateRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.partition_key == partition_key)
            .cloned()
            .collect())
    }

    async fn delete_where(&self, partition_key: &str, filter: &str) -> Result<u64, StoreError> {
        if self.deny_delete_partitions.iter().any(|p| p == partition_key) {
            return Err(StoreError::PermissionDenied {
                operation: StoreOperation::Delete,
                detail: "AuthorizationPermissionMismatch".to_string(),
            });
        }
        let user = filter
            .strip_prefix("UserId eq '")
            .and_then(|rest| rest.strip_suffix('\''))
            .map(str::to_string);
        let mut table = self.rows.lock().unwrap();
        let before = table.len();
        table.retain(|(pk, _), row| !(pk == partition_key && row.user_id == user));
        Ok((before - table.len()) as u64)
    }
}

struct GrantingValidator;

#[async_trait::async_trait]
impl ICredentialValidator for GrantingValidator {
    async fn probe(&self) -> Result<ProbeReport, StoreError> {
        Ok(ProbeReport {
            auth_mode: AuthMode::SharedKey,
            can_write: true,
            can_delete: true,
        })
    }
}

#[derive(Default)]
struct FixedStatsCache {
    entries: HashMap<PathBuf, SessionStats>,
}

#[async_trait::async_trait]
impl ISessionStatsCache for FixedStatsCache {
    async fn fetch(&self, path: &Path, _mtime: DateTime<Utc>) -> anyhow::Result<CachedLookup> {
        let stats = self
            .entries
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no stats for {}", path.display()))?;
        Ok(CachedLookup {
            stats,
            cache_hit: true,
        })
    }
}

struct FixedSessionSource {
    files: Vec<SessionFile>,
}

#[async_trait::async_trait]
impl ISessionSource for FixedSessionSource {
    async fn session_files(&self) -> anyhow::Result<Vec<SessionFile>> {
        Ok(self.files.clone())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 20, 12, 0, 0).unwrap()
}

fn dataset() -> DatasetId {
    DatasetId::new("demo").unwrap()
}

fn seeded_row(day: NaiveDate, model: &str, user: &str, input: u64) -> UsageAggregateRow {
    UsageAggregateRow {
        partition_key: UsageAggregateRow::partition_key_for(&dataset(), day),
        row_key: UsageAggregateRow::row_key_for(model, "ws", "m", Some(user)),
        schema_version: 2,
        dataset_id: "demo".to_string(),
        day,
        model: model.to_string(),
        workspace_id: "ws".to_string(),
        workspace_name: None,
        machine_id: "m".to_string(),
        machine_name: None,
        user_id: Some(user.to_string()),
        user_key_type: None,
        input_tokens: input,
        output_tokens: 0,
        interactions: 1,
        share_with_team: Some(true),
        consent_at: None,
        updated_at: now(),
    }
}

fn base_config() -> Config {
    let mut config = Config::default();
    config.sharing.dataset_id = "demo".to_string();
    config.sharing.profile = SharingProfile::TeamIdentified;
    config.sharing.identity_mode = IdentityMode::TeamAlias;
    config.sharing.consent_at = Some(now() - Duration::days(1));
    config.table.storage_account = "teamusage".to_string();
    config
}

fn local_context() -> LocalContext {
    LocalContext {
        workspace_id: "ws".to_string(),
        workspace_name: Some("Alpha".to_string()),
        machine_id: "m".to_string(),
        machine_name: None,
        tenant_id: None,
        object_id: None,
        team_alias: Some("dev-01".to_string()),
    }
}

struct Harness {
    facade: Facade,
    store: Arc<MemoryStore>,
    _config_dir: tempfile::TempDir,
}

fn harness_with(store: MemoryStore, cache: FixedStatsCache, files: Vec<SessionFile>) -> Harness {
    let config_dir = tempfile::tempdir().unwrap();
    let config_path = config_dir.path().join("config.yaml");
    let store = Arc::new(store);
    let clock = Arc::new(ManualClock::new(now()));

    let facade = Facade::new(
        base_config(),
        config_path,
        local_context(),
        FacadeDeps {
            store: store.clone(),
            validator: Arc::new(GrantingValidator),
            stats_cache: Arc::new(cache),
            session_source: Arc::new(FixedSessionSource { files }),
            clock,
        },
    )
    .unwrap();

    Harness {
        facade,
        store,
        _config_dir: config_dir,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_upload_then_query_round_trip() {
    let mut cache = FixedStatsCache::default();
    let mut model_usage = HashMap::new();
    model_usage.insert(
        "gpt-4o".to_string(),
        ModelTokens {
            input_tokens: 100,
            output_tokens: 40,
        },
    );
    cache.entries.insert(
        PathBuf::from("/s/a.jsonl"),
        SessionStats {
            interactions: 1,
            model_usage,
            mtime: now(),
        },
    );
    let files = vec![SessionFile {
        path: PathBuf::from("/s/a.jsonl"),
        mtime: now() - Duration::hours(2),
    }];

    let h = harness_with(MemoryStore::default(), cache, files);

    let outcome = h.facade.upload_rollups().await;
    assert!(matches!(outcome, CycleOutcome::Completed(_)), "{outcome:?}");

    let day = now().date_naive();
    let result = h
        .facade
        .query_aggregates(&QueryFilters::range(day, day), GroupDimension::User)
        .await
        .unwrap();

    assert_eq!(result.buckets.len(), 1);
    assert_eq!(result.buckets[0].key, "dev-01");
    assert_eq!(result.buckets[0].input_tokens, 100);
}

#[tokio::test]
async fn test_delete_user_data_removes_only_that_user() {
    let store = MemoryStore::default();
    let jan16 = NaiveDate::from_ymd_opt(2026, 1, 16).unwrap();
    let jan17 = NaiveDate::from_ymd_opt(2026, 1, 17).unwrap();
    store.seed(vec![
        seeded_row(jan16, "gpt-4o", "user123", 100),
        seeded_row(jan17, "gpt-4o", "user123", 50),
        seeded_row(jan16, "gpt-4o", "user456", 70),
        seeded_row(jan17, "gpt-4o-mini", "user456", 30),
    ]);

    let h = harness_with(store, FixedStatsCache::default(), Vec::new());

    let report = h.facade.delete_user_data("user123").await.unwrap();

    assert_eq!(report.rows_deleted, 2);
    assert_eq!(report.partitions_scanned, 400);
    assert!(report.failures.is_empty());
    assert_eq!(h.store.remaining_users(), vec!["user456".to_string()]);
}

#[tokio::test]
async fn test_delete_user_data_reports_partial_permission_failures() {
    let jan16 = NaiveDate::from_ymd_opt(2026, 1, 16).unwrap();
    let jan17 = NaiveDate::from_ymd_opt(2026, 1, 17).unwrap();
    let denied_partition = UsageAggregateRow::partition_key_for(&dataset(), jan16);

    let mut store = MemoryStore::default();
    store.deny_delete_partitions = vec![denied_partition.clone()];
    store.seed(vec![
        seeded_row(jan16, "gpt-4o", "user123", 100),
        seeded_row(jan17, "gpt-4o", "user123", 50),
    ]);

    let h = harness_with(store, FixedStatsCache::default(), Vec::new());
    let report = h.facade.delete_user_data("user123").await.unwrap();

    // The allowed partition was cleaned; the denied one is reported.
    assert_eq!(report.rows_deleted, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].partition_key, denied_partition);
    assert_eq!(h.store.remaining_users(), vec!["user123".to_string()]);
}

#[tokio::test]
async fn test_delete_user_data_rejects_injection() {
    let h = harness_with(MemoryStore::default(), FixedStatsCache::default(), Vec::new());
    let err = h
        .facade
        .delete_user_data("x' or RowKey ne '")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidFilter(_)));
}

#[tokio::test]
async fn test_consent_gate_blocks_raising_disclosure() {
    let config_dir = tempfile::tempdir().unwrap();
    let config_path = config_dir.path().join("config.yaml");
    let mut config = base_config();
    config.sharing.profile = SharingProfile::Off;
    config.sharing.consent_at = None;

    let facade = Facade::new(
        config,
        config_path.clone(),
        local_context(),
        FacadeDeps {
            store: Arc::new(MemoryStore::default()),
            validator: Arc::new(GrantingValidator),
            stats_cache: Arc::new(FixedStatsCache::default()),
            session_source: Arc::new(FixedSessionSource { files: Vec::new() }),
            clock: Arc::new(ManualClock::new(now())),
        },
    )
    .unwrap();

    // Raising without consent is rejected.
    let err = facade
        .set_sharing_profile(SharingProfile::TeamIdentified, None)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DomainError>(),
        Some(DomainError::ConsentRequired { .. })
    ));
    assert_eq!(facade.sharing_profile(), SharingProfile::Off);

    // Raising with consent is applied and persisted.
    facade
        .set_sharing_profile(SharingProfile::TeamIdentified, Some(now()))
        .unwrap();
    assert_eq!(facade.sharing_profile(), SharingProfile::TeamIdentified);

    let persisted = Config::load(&config_path).unwrap();
    assert_eq!(persisted.sharing.profile, SharingProfile::TeamIdentified);
    assert!(persisted.sharing.consent_at.is_some());

    // Lowering never needs consent.
    facade
        .set_sharing_profile(SharingProfile::TeamAnonymized, None)
        .unwrap();
    assert_eq!(facade.sharing_profile(), SharingProfile::TeamAnonymized);
}

#[tokio::test]
async fn test_setup_persists_provisioned_resources() {
    let h = harness_with(MemoryStore::default(), FixedStatsCache::default(), Vec::new());

    h.facade
        .setup(&ProvisionedResources {
            subscription_id: "sub-1".to_string(),
            resource_group: "rg-usage".to_string(),
            storage_account: "newaccount".to_string(),
            table_name: "newrollups".to_string(),
        })
        .unwrap();

    // The new settings survive a reload from disk.
    let persisted = Config::load(&h._config_dir.path().join("config.yaml")).unwrap();
    assert_eq!(persisted.table.storage_account, "newaccount");
    assert_eq!(persisted.table.table_name, "newrollups");
}

#[tokio::test]
async fn test_probe_credentials_passthrough() {
    let h = harness_with(MemoryStore::default(), FixedStatsCache::default(), Vec::new());
    let report = h.facade.probe_credentials().await.unwrap();
    assert!(report.can_write);
    assert!(report.can_delete);
}
