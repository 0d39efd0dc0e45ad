//! Sync cycle engine
//!
//! The [`SyncEngine`] orchestrates one synchronization cycle against the
//! shared table store.
//!
//! ## Cycle Flow
//!
//! 1. **Validating**: probe the credential and table permissions
//! 2. **Computing**: recompute the full daily rollups from local state
//! 3. **Uploading**: batch-upsert rows; report failures per batch
//!
//! `Failed` is reachable from any active state. There is no intra-cycle
//! retry: a failed cycle is simply skipped, and the next scheduled tick
//! recomputes everything from scratch. Rollup recomputation plus
//! replace-style upserts are what make that safe - failed rows are
//! naturally retried next cycle with fresh totals, requiring no manual
//! reconciliation.
//!
//! ## Concurrency
//!
//! Exactly one cycle may be in flight per engine. A concurrent trigger
//! (scheduled tick or manual request) while one is running is coalesced
//! to a no-op, never queued, which bounds resource use and prevents
//! duplicate uploads racing each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use metershare_core::ports::credential::ICredentialValidator;
use metershare_core::ports::session_cache::SessionFile;
use metershare_core::ports::table_store::{ITableStore, StoreError};
use metershare_rollup::builder::{RollupBuilder, RollupParams};

/// Rows per upsert batch
const UPLOAD_BATCH_SIZE: usize = 100;

/// State of the engine's cycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Validating,
    Computing,
    Uploading,
    Failed,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Computing => "computing",
            Self::Uploading => "uploading",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Structured reason a cycle failed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CycleError {
    /// Bad local input (alias, config); never retried as-is
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or invalid credential; aborts this cycle only
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Credential lacks a required role; the detail names the remediation
    #[error("permission denied: {0}")]
    Permission(String),

    /// Network failure or timeout; deferred to the next scheduled tick
    #[error("network failure: {0}")]
    Network(String),

    /// Some batches succeeded, some failed; succeeded rows stay written
    #[error("{failed_batches} of {total_batches} batches failed after {uploaded_rows} rows: {first_error}")]
    PartialBatch {
        uploaded_rows: usize,
        failed_batches: usize,
        total_batches: usize,
        first_error: String,
    },
}

/// Maps a store error onto the cycle failure taxonomy
fn classify_store_error(err: &StoreError) -> CycleError {
    match err {
        StoreError::Auth(detail) => CycleError::Auth(detail.clone()),
        StoreError::PermissionDenied { .. } => CycleError::Permission(err.to_string()),
        StoreError::Network(_) | StoreError::Timeout(_) => CycleError::Network(err.to_string()),
        StoreError::InvalidFilter(detail) => CycleError::Validation(detail.clone()),
        StoreError::Malformed(detail) => CycleError::Validation(detail.clone()),
        StoreError::Http { .. } => CycleError::Network(err.to_string()),
    }
}

/// Summary of a completed synchronization cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Rows produced by the rollup pass
    pub rows_computed: usize,
    /// Rows confirmed by the store this cycle
    pub rows_uploaded: usize,
    /// Batches attempted
    pub total_batches: usize,
    /// Session files served from the external cache
    pub cache_hits: u64,
    /// Session files the collaborator had to reparse
    pub cache_misses: u64,
    /// Files dropped because their stats could not be fetched
    pub files_skipped: u64,
    /// Wall-clock duration of the cycle in milliseconds
    pub duration_ms: u64,
}

/// How a cycle trigger resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every batch was confirmed
    Completed(CycleSummary),
    /// Another cycle was already in flight; this trigger was a no-op
    AlreadyRunning,
    /// The sharing profile is `off`; nothing is uploaded
    SharingDisabled,
    /// The cycle was skipped; the next tick retries from scratch
    Failed(CycleError),
}

/// Inputs for one cycle, snapshotted by the caller at trigger time
#[derive(Debug, Clone)]
pub struct CycleRequest {
    pub files: Vec<SessionFile>,
    pub params: RollupParams,
}

/// Orchestrates validate → compute → upload cycles
///
/// ## Dependencies
///
/// - `validator`: credential and permission probe
/// - `store`: batch upserts to the shared table
/// - `builder`: deterministic rollup computation
pub struct SyncEngine {
    validator: Arc<dyn ICredentialValidator>,
    store: Arc<dyn ITableStore>,
    builder: RollupBuilder,
    /// The engine-owned in-flight guard; one cycle per engine instance
    in_flight: AtomicBool,
    phase: Mutex<CyclePhase>,
}

impl SyncEngine {
    /// Creates a new `SyncEngine` with the given dependencies
    pub fn new(
        validator: Arc<dyn ICredentialValidator>,
        store: Arc<dyn ITableStore>,
        builder: RollupBuilder,
    ) -> Self {
        Self {
            validator,
            store,
            builder,
            in_flight: AtomicBool::new(false),
            phase: Mutex::new(CyclePhase::Idle),
        }
    }

    /// The current phase of the cycle state machine
    pub fn phase(&self) -> CyclePhase {
        *self.phase.lock().expect("phase mutex poisoned")
    }

    fn set_phase(&self, phase: CyclePhase) {
        let mut current = self.phase.lock().expect("phase mutex poisoned");
        debug!(from = %current, to = %phase, "Cycle phase transition");
        *current = phase;
    }

    /// Runs one sync cycle, or coalesces to a no-op if one is running.
    ///
    /// Never panics and never returns `Err`: every failure mode degrades
    /// to [`CycleOutcome::Failed`] and local functionality is unaffected.
    #[tracing::instrument(skip_all)]
    pub async fn run_cycle(&self, request: &CycleRequest) -> CycleOutcome {
        if !request.params.profile.uploads_enabled() {
            debug!("Sharing profile is off, skipping sync cycle");
            return CycleOutcome::SharingDisabled;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Sync cycle already in flight, coalescing trigger to a no-op");
            return CycleOutcome::AlreadyRunning;
        }

        let outcome = self.run_cycle_inner(request).await;

        match &outcome {
            CycleOutcome::Completed(summary) => {
                self.set_phase(CyclePhase::Idle);
                info!(
                    rows = summary.rows_uploaded,
                    batches = summary.total_batches,
                    cache_hits = summary.cache_hits,
                    cache_misses = summary.cache_misses,
                    duration_ms = summary.duration_ms,
                    "Sync cycle completed"
                );
            }
            CycleOutcome::Failed(err) => {
                self.set_phase(CyclePhase::Failed);
                warn!(%err, "Sync cycle skipped");
            }
            CycleOutcome::AlreadyRunning | CycleOutcome::SharingDisabled => {}
        }

        self.in_flight.store(false, Ordering::Release);
        outcome
    }

    async fn run_cycle_inner(&self, request: &CycleRequest) -> CycleOutcome {
        let start = std::time::Instant::now();

        // Step 1: Validating. Fail fast, no retry within this cycle.
        self.set_phase(CyclePhase::Validating);
        if let Err(err) = self.validator.probe().await {
            return CycleOutcome::Failed(classify_store_error(&err));
        }

        // Step 2: Computing. The full daily totals are recomputed from
        // local state every cycle; nothing resumes from partial state.
        self.set_phase(CyclePhase::Computing);
        let rollup = match self
            .builder
            .compute_daily_rollups(&request.files, &request.params)
            .await
        {
            Ok(rollup) => rollup,
            Err(err) => return CycleOutcome::Failed(CycleError::Validation(err.to_string())),
        };

        let mut summary = CycleSummary {
            rows_computed: rollup.rows.len(),
            cache_hits: rollup.cache_hits,
            cache_misses: rollup.cache_misses,
            files_skipped: rollup.files_skipped,
            ..CycleSummary::default()
        };

        if rollup.rows.is_empty() {
            summary.duration_ms = start.elapsed().as_millis() as u64;
            return CycleOutcome::Completed(summary);
        }

        // Step 3: Uploading. Confirmed batches stay written and are not
        // resent this cycle; a failed batch is retried only next tick.
        self.set_phase(CyclePhase::Uploading);
        let batches: Vec<&[_]> = rollup.rows.chunks(UPLOAD_BATCH_SIZE).collect();
        summary.total_batches = batches.len();

        let mut failed_batches = 0usize;
        let mut first_error: Option<CycleError> = None;

        for (index, batch) in batches.iter().enumerate() {
            match self.store.upsert_batch(batch).await {
                Ok(()) => {
                    summary.rows_uploaded += batch.len();
                    debug!(batch = index, rows = batch.len(), "Batch confirmed");
                }
                Err(err) => {
                    warn!(batch = index, %err, "Batch failed");
                    failed_batches += 1;
                    let classified = classify_store_error(&err);
                    let fatal = matches!(
                        classified,
                        CycleError::Auth(_) | CycleError::Permission(_)
                    );
                    if first_error.is_none() {
                        first_error = Some(classified);
                    }
                    if fatal {
                        // Remaining batches would fail identically.
                        failed_batches += batches.len() - index - 1;
                        break;
                    }
                }
            }
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;

        if failed_batches > 0 {
            let first_error = first_error.expect("failed batch recorded an error");
            CycleOutcome::Failed(CycleError::PartialBatch {
                uploaded_rows: summary.rows_uploaded,
                failed_batches,
                total_batches: summary.total_batches,
                first_error: first_error.to_string(),
            })
        } else {
            CycleOutcome::Completed(summary)
        }
    }
}
