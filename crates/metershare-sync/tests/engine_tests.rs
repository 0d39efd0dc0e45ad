//! Sync engine integration tests with in-memory port fakes

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};

use metershare_core::config::LocalContext;
use metershare_core::domain::aggregate::UsageAggregateRow;
use metershare_core::domain::identity::IdentityMode;
use metershare_core::domain::newtypes::DatasetId;
use metershare_core::domain::sharing::SharingProfile;
use metershare_core::ports::clock::ManualClock;
use metershare_core::ports::credential::{AuthMode, ICredentialValidator, ProbeReport};
use metershare_core::ports::session_cache::{
    CachedLookup, ISessionStatsCache, ModelTokens, SessionFile, SessionStats,
};
use metershare_core::ports::table_store::{ITableStore, StoreError, StoreOperation};
use metershare_rollup::builder::{RollupBuilder, RollupParams};
use metershare_sync::{CycleError, CycleOutcome, CyclePhase, CycleRequest, SyncEngine};

// ============================================================================
// Fakes
// ============================================================================

/// In-memory table keyed like the real store; upserts are replacements
struct MemoryStore {
    rows: Mutex<HashMap<(String, String), UsageAggregateRow>>,
    batch_calls: AtomicUsize,
    /// 1-based indices of batch calls that fail with a network error
    fail_batches: Vec<usize>,
    /// Delay applied to every batch, for overlap tests
    batch_delay: StdDuration,
}

impl MemoryStore {
    fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            batch_calls: AtomicUsize::new(0),
            fail_batches: Vec::new(),
            batch_delay: StdDuration::ZERO,
        }
    }

    fn failing_on(batches: Vec<usize>) -> Self {
        Self {
            fail_batches: batches,
            ..Self::new()
        }
    }

    fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Vec<UsageAggregateRow> {
        let mut rows: Vec<_> = self.rows.lock().unwrap().values().cloned().collect();
        rows.sort_by(|a, b| (&a.partition_key, &a.row_key).cmp(&(&b.partition_key, &b.row_key)));
        rows
    }
}

#[async_trait::async_trait]
impl ITableStore for MemoryStore {
    async fn upsert_batch(&self, rows: &[UsageAggregateRow]) -> Result<(), StoreError> {
        let call = self.batch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.batch_delay.is_zero() {
            tokio::time::sleep(self.batch_delay).await;
        }
        if self.fail_batches.contains(&call) {
            return Err(StoreError::Network("connection reset by peer".to_string()));
        }
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
        // Filter shape used by the facade: UserId eq '<value>'
        let user = filter
            .strip_prefix("UserId eq '")
            .and_then(|rest| rest.strip_suffix('\''))
            .map(str::to_string);
        let mut table = self.rows.lock().unwrap();
        let before = table.len();
        table.retain(|(pk, _), row| {
            !(pk == partition_key && user.is_some() && row.user_id == user)
        });
        Ok((before - table.len()) as u64)
    }
}

/// Validator fake that always grants, optionally slowly
struct GrantingValidator {
    delay: StdDuration,
}

impl GrantingValidator {
    fn new() -> Self {
        Self {
            delay: StdDuration::ZERO,
        }
    }

    fn slow(delay: StdDuration) -> Self {
        Self { delay }
    }
}

#[async_trait::async_trait]
impl ICredentialValidator for GrantingValidator {
    async fn probe(&self) -> Result<ProbeReport, StoreError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ProbeReport {
            auth_mode: AuthMode::EntraId,
            can_write: true,
            can_delete: true,
        })
    }
}

/// Validator fake that denies with a fixed error
struct DenyingValidator {
    error: StoreError,
}

#[async_trait::async_trait]
impl ICredentialValidator for DenyingValidator {
    async fn probe(&self) -> Result<ProbeReport, StoreError> {
        Err(self.error.clone())
    }
}

/// Stats cache fake serving fixed per-file stats
struct FixedStatsCache {
    entries: HashMap<PathBuf, SessionStats>,
}

impl FixedStatsCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn with(mut self, path: &str, model_usage: HashMap<String, ModelTokens>) -> Self {
        self.entries.insert(
            PathBuf::from(path),
            SessionStats {
                interactions: 1,
                model_usage,
                mtime: Utc::now(),
            },
        );
        self
    }
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

// ============================================================================
// Helpers
// ============================================================================

fn usage(model: &str, input: u64, output: u64) -> HashMap<String, ModelTokens> {
    let mut map = HashMap::new();
    map.insert(
        model.to_string(),
        ModelTokens {
            input_tokens: input,
            output_tokens: output,
        },
    );
    map
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 16, 18, 0, 0).unwrap()
}

fn params(profile: SharingProfile) -> RollupParams {
    RollupParams {
        dataset_id: DatasetId::new("demo").unwrap(),
        profile,
        consent_at: None,
        lookback_days: 30,
        identity_mode: IdentityMode::None,
        local: LocalContext {
            workspace_id: "ws".to_string(),
            workspace_name: None,
            machine_id: "m1".to_string(),
            machine_name: None,
            tenant_id: None,
            object_id: None,
            team_alias: None,
        },
    }
}

fn request(files: Vec<SessionFile>, profile: SharingProfile) -> CycleRequest {
    CycleRequest {
        files,
        params: params(profile),
    }
}

fn files(paths: &[&str]) -> Vec<SessionFile> {
    paths
        .iter()
        .map(|p| SessionFile {
            path: PathBuf::from(p),
            mtime: now() - Duration::hours(1),
        })
        .collect()
}

fn engine_with(
    validator: Arc<dyn ICredentialValidator>,
    store: Arc<MemoryStore>,
    cache: Arc<dyn ISessionStatsCache>,
) -> SyncEngine {
    let clock = Arc::new(ManualClock::new(now()));
    SyncEngine::new(validator, store, RollupBuilder::new(cache, clock))
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_full_cycle_uploads_rollups() {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(
        FixedStatsCache::new()
            .with("/s/a.jsonl", usage("gpt-4o", 100, 50))
            .with("/s/b.jsonl", usage("gpt-4o", 200, 75)),
    );
    let engine = engine_with(Arc::new(GrantingValidator::new()), store.clone(), cache);

    let outcome = engine
        .run_cycle(&request(
            files(&["/s/a.jsonl", "/s/b.jsonl"]),
            SharingProfile::TeamAnonymized,
        ))
        .await;

    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.rows_computed, 1);
    assert_eq!(summary.rows_uploaded, 1);
    assert_eq!(summary.cache_hits, 2);
    assert_eq!(engine.phase(), CyclePhase::Idle);

    let remote = store.snapshot();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].input_tokens, 300);
    assert_eq!(remote[0].output_tokens, 125);
    assert_eq!(remote[0].interactions, 2);
}

#[tokio::test]
async fn test_uploading_twice_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(
        FixedStatsCache::new()
            .with("/s/a.jsonl", usage("gpt-4o", 100, 50))
            .with("/s/b.jsonl", usage("gpt-4o-mini", 20, 5)),
    );
    let engine = engine_with(Arc::new(GrantingValidator::new()), store.clone(), cache);
    let req = request(
        files(&["/s/a.jsonl", "/s/b.jsonl"]),
        SharingProfile::TeamAnonymized,
    );

    assert!(matches!(
        engine.run_cycle(&req).await,
        CycleOutcome::Completed(_)
    ));
    let first = store.snapshot();

    assert!(matches!(
        engine.run_cycle(&req).await,
        CycleOutcome::Completed(_)
    ));
    let second = store.snapshot();

    // No duplication, no double-summing: the remote row set is identical.
    assert_eq!(first, second);
    assert_eq!(second.len(), 2);
}

#[tokio::test]
async fn test_concurrent_trigger_coalesces_to_noop() {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(FixedStatsCache::new().with("/s/a.jsonl", usage("gpt-4o", 10, 5)));
    let engine = Arc::new(engine_with(
        Arc::new(GrantingValidator::slow(StdDuration::from_millis(100))),
        store.clone(),
        cache,
    ));
    let req = request(files(&["/s/a.jsonl"]), SharingProfile::TeamAnonymized);

    let (first, second) = tokio::join!(engine.run_cycle(&req), engine.run_cycle(&req));

    let outcomes = [first, second];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, CycleOutcome::AlreadyRunning))
            .count(),
        1,
        "exactly one trigger must coalesce: {outcomes:?}"
    );
    // No second batch-upsert sequence ran.
    assert_eq!(store.batch_calls(), 1);
}

#[tokio::test]
async fn test_off_profile_skips_upload_entirely() {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(FixedStatsCache::new().with("/s/a.jsonl", usage("gpt-4o", 10, 5)));
    let engine = engine_with(Arc::new(GrantingValidator::new()), store.clone(), cache);

    let outcome = engine
        .run_cycle(&request(files(&["/s/a.jsonl"]), SharingProfile::Off))
        .await;

    assert_eq!(outcome, CycleOutcome::SharingDisabled);
    assert_eq!(store.batch_calls(), 0);
}

#[tokio::test]
async fn test_validation_failure_skips_cycle_with_structured_reason() {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(FixedStatsCache::new());
    let clock = Arc::new(ManualClock::new(now()));
    let engine = SyncEngine::new(
        Arc::new(DenyingValidator {
            error: StoreError::PermissionDenied {
                operation: StoreOperation::Write,
                detail: "missing write role".to_string(),
            },
        }),
        store.clone(),
        RollupBuilder::new(cache, clock),
    );

    let outcome = engine
        .run_cycle(&request(Vec::new(), SharingProfile::TeamAnonymized))
        .await;

    let CycleOutcome::Failed(err) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(matches!(err, CycleError::Permission(_)));
    assert_eq!(engine.phase(), CyclePhase::Failed);
    // The cycle stopped before any upload.
    assert_eq!(store.batch_calls(), 0);
}

#[tokio::test]
async fn test_auth_failure_is_classified_distinctly() {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(FixedStatsCache::new());
    let clock = Arc::new(ManualClock::new(now()));
    let engine = SyncEngine::new(
        Arc::new(DenyingValidator {
            error: StoreError::Auth("token expired".to_string()),
        }),
        store,
        RollupBuilder::new(cache, clock),
    );

    let outcome = engine
        .run_cycle(&request(Vec::new(), SharingProfile::TeamAnonymized))
        .await;
    assert!(matches!(
        outcome,
        CycleOutcome::Failed(CycleError::Auth(_))
    ));
}

#[tokio::test]
async fn test_failed_batch_keeps_confirmed_batches_and_reports_partial() {
    // 250 distinct models -> 250 rows -> 3 batches of 100/100/50.
    let mut model_usage = HashMap::new();
    for i in 0..250 {
        model_usage.insert(
            format!("model-{i:03}"),
            ModelTokens {
                input_tokens: 10,
                output_tokens: 1,
            },
        );
    }
    let cache = Arc::new(FixedStatsCache::new().with("/s/big.jsonl", model_usage));
    let store = Arc::new(MemoryStore::failing_on(vec![2]));
    let engine = engine_with(Arc::new(GrantingValidator::new()), store.clone(), cache);

    let outcome = engine
        .run_cycle(&request(
            files(&["/s/big.jsonl"]),
            SharingProfile::TeamAnonymized,
        ))
        .await;

    let CycleOutcome::Failed(CycleError::PartialBatch {
        uploaded_rows,
        failed_batches,
        total_batches,
        ..
    }) = outcome
    else {
        panic!("expected partial batch failure, got {outcome:?}");
    };

    assert_eq!(total_batches, 3);
    assert_eq!(failed_batches, 1);
    assert_eq!(uploaded_rows, 150);
    // All three batches were attempted; confirmed ones were not resent.
    assert_eq!(store.batch_calls(), 3);
    assert_eq!(store.snapshot().len(), 150);
    assert_eq!(engine.phase(), CyclePhase::Failed);
}

#[tokio::test]
async fn test_next_cycle_retries_failed_rows_from_scratch() {
    let cache = Arc::new(FixedStatsCache::new().with("/s/a.jsonl", usage("gpt-4o", 10, 5)));
    // First cycle's only batch fails; the second cycle's succeeds.
    let store = Arc::new(MemoryStore::failing_on(vec![1]));
    let engine = engine_with(Arc::new(GrantingValidator::new()), store.clone(), cache);
    let req = request(files(&["/s/a.jsonl"]), SharingProfile::TeamAnonymized);

    assert!(matches!(
        engine.run_cycle(&req).await,
        CycleOutcome::Failed(CycleError::PartialBatch { .. })
    ));
    assert_eq!(store.snapshot().len(), 0);

    // Rollups are recomputed, not resumed: the retry uploads everything.
    assert!(matches!(
        engine.run_cycle(&req).await,
        CycleOutcome::Completed(_)
    ));
    assert_eq!(store.snapshot().len(), 1);
    assert_eq!(engine.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn test_empty_rollup_completes_without_upload() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(
        Arc::new(GrantingValidator::new()),
        store.clone(),
        Arc::new(FixedStatsCache::new()),
    );

    let outcome = engine
        .run_cycle(&request(Vec::new(), SharingProfile::TeamAnonymized))
        .await;

    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.rows_computed, 0);
    assert_eq!(store.batch_calls(), 0);
}

#[tokio::test]
async fn test_invalid_alias_surfaces_as_validation_error() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(
        Arc::new(GrantingValidator::new()),
        store,
        Arc::new(FixedStatsCache::new()),
    );

    let mut req = request(Vec::new(), SharingProfile::TeamIdentified);
    req.params.identity_mode = IdentityMode::TeamAlias;
    req.params.local.team_alias = Some("a@b".to_string());

    let outcome = engine.run_cycle(&req).await;
    let CycleOutcome::Failed(CycleError::Validation(detail)) = outcome else {
        panic!("expected validation failure, got {outcome:?}");
    };
    assert!(detail.contains("email marker"));
}
