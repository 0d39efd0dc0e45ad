//! Rollup builder
//!
//! Computes one cycle's worth of daily aggregate rows from the local
//! session-stats cache.
//!
//! ## Aggregation vs replacement
//!
//! Multiple files mapping to the same `(day, model)` key within a cycle
//! are **summed** - that is the within-cycle aggregation. The resulting
//! row is then **replaced** remotely by the idempotent upsert. The two
//! must not be confused: summing remotely would double-count across
//! machines and cycles.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, warn};

use metershare_core::config::LocalContext;
use metershare_core::domain::aggregate::UsageAggregateRow;
use metershare_core::domain::errors::DomainError;
use metershare_core::domain::identity::{self, scoped_hash, IdentityContext, IdentityMode};
use metershare_core::domain::newtypes::DatasetId;
use metershare_core::domain::sharing::SharingProfile;
use metershare_core::ports::clock::IClock;
use metershare_core::ports::session_cache::{ISessionStatsCache, SessionFile};

/// Inputs for one rollup pass, snapshotted at cycle start
#[derive(Debug, Clone)]
pub struct RollupParams {
    pub dataset_id: DatasetId,
    pub profile: SharingProfile,
    pub consent_at: Option<DateTime<Utc>>,
    pub lookback_days: u32,
    pub identity_mode: IdentityMode,
    pub local: LocalContext,
}

/// Result of one rollup pass
#[derive(Debug, Clone, Default)]
pub struct RollupOutput {
    /// Rows sorted by `(partition_key, row_key)`
    pub rows: Vec<UsageAggregateRow>,
    /// Session files served from the external cache
    pub cache_hits: u64,
    /// Session files the collaborator had to reparse
    pub cache_misses: u64,
    /// Files dropped because their stats could not be fetched
    pub files_skipped: u64,
}

/// Per-key running totals during the aggregation pass
#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    input_tokens: u64,
    output_tokens: u64,
    interactions: u64,
}

/// Folds cached per-file session stats into keyed daily aggregate rows
pub struct RollupBuilder {
    cache: Arc<dyn ISessionStatsCache>,
    clock: Arc<dyn IClock>,
}

impl RollupBuilder {
    /// Creates a builder over the externally owned stats cache
    pub fn new(cache: Arc<dyn ISessionStatsCache>, clock: Arc<dyn IClock>) -> Self {
        Self { cache, clock }
    }

    /// Computes the full daily rollups for this cycle.
    ///
    /// 1. Filters `files` to those modified within the lookback window
    /// 2. Fetches each file's stats through the cache port
    /// 3. Sums tokens per `(day, model)` - workspace, machine, and user
    ///    are constants for the process, so they complete the key
    /// 4. Applies the sharing policy to the aggregated totals
    ///
    /// The output recomputes the **full** day's total from local state
    /// every cycle; uploads replace remote rows, never increment them.
    ///
    /// # Errors
    ///
    /// Only identity resolution fails the pass (e.g. an invalid team
    /// alias); unreadable files are skipped and counted.
    pub async fn compute_daily_rollups(
        &self,
        files: &[SessionFile],
        params: &RollupParams,
    ) -> Result<RollupOutput, DomainError> {
        let now = self.clock.now();
        let window_start = now - Duration::days(i64::from(params.lookback_days));

        let identity_ctx = IdentityContext {
            tenant_id: params.local.tenant_id.clone(),
            object_id: params.local.object_id.clone(),
            team_alias: params.local.team_alias.clone(),
        };
        let identity = identity::resolve(params.identity_mode, &identity_ctx, &params.dataset_id)?;

        let mut output = RollupOutput::default();
        let mut totals: BTreeMap<(NaiveDate, String), Totals> = BTreeMap::new();

        for file in files {
            if file.mtime < window_start || file.mtime > now {
                debug!(path = %file.path.display(), "Session file outside lookback window");
                continue;
            }

            let lookup = match self.cache.fetch(&file.path, file.mtime).await {
                Ok(lookup) => lookup,
                Err(err) => {
                    warn!(path = %file.path.display(), %err, "Skipping unreadable session file");
                    output.files_skipped += 1;
                    continue;
                }
            };

            if lookup.cache_hit {
                output.cache_hits += 1;
            } else {
                output.cache_misses += 1;
            }

            let day = file.mtime.date_naive();
            for (model, tokens) in &lookup.stats.model_usage {
                let entry = totals.entry((day, model.clone())).or_default();
                entry.input_tokens = entry.input_tokens.saturating_add(tokens.input_tokens);
                entry.output_tokens = entry.output_tokens.saturating_add(tokens.output_tokens);
                entry.interactions += 1;
            }
        }

        let policy = params.profile.policy();

        let workspace_id = if policy.hash_workspace_machine {
            scoped_hash(&[&params.local.workspace_id, params.dataset_id.as_str()])
        } else {
            params.local.workspace_id.clone()
        };
        let machine_id = if policy.hash_workspace_machine {
            scoped_hash(&[&params.local.machine_id, params.dataset_id.as_str()])
        } else {
            params.local.machine_id.clone()
        };

        let user_id = if policy.include_user_id {
            identity.as_ref().map(|key| key.as_str().to_string())
        } else {
            None
        };
        let user_key_type = if user_id.is_some() {
            identity.as_ref().map(|key| key.key_type())
        } else {
            None
        };

        // Names are doubly gated: the policy must allow them AND the user
        // must have recorded consent.
        let attach_names = policy.include_names && params.consent_at.is_some();
        let workspace_name = attach_names
            .then(|| params.local.workspace_name.clone())
            .flatten();
        let machine_name = attach_names
            .then(|| params.local.machine_name.clone())
            .flatten();

        let consent_at = if user_id.is_some() {
            params.consent_at
        } else {
            None
        };

        for ((day, model), sums) in totals {
            let row = UsageAggregateRow {
                partition_key: UsageAggregateRow::partition_key_for(&params.dataset_id, day),
                row_key: UsageAggregateRow::row_key_for(
                    &model,
                    &workspace_id,
                    &machine_id,
                    user_id.as_deref(),
                ),
                schema_version: UsageAggregateRow::schema_version_for(
                    user_id.as_deref(),
                    consent_at.as_ref(),
                ),
                dataset_id: params.dataset_id.as_str().to_string(),
                day,
                model,
                workspace_id: workspace_id.clone(),
                workspace_name: workspace_name.clone(),
                machine_id: machine_id.clone(),
                machine_name: machine_name.clone(),
                user_id: user_id.clone(),
                user_key_type,
                input_tokens: sums.input_tokens,
                output_tokens: sums.output_tokens,
                interactions: sums.interactions,
                share_with_team: params.profile.shares_with_team(),
                consent_at,
                updated_at: now,
            };
            output.rows.push(row);
        }

        output
            .rows
            .sort_by(|a, b| (&a.partition_key, &a.row_key).cmp(&(&b.partition_key, &b.row_key)));

        debug!(
            rows = output.rows.len(),
            cache_hits = output.cache_hits,
            cache_misses = output.cache_misses,
            files_skipped = output.files_skipped,
            "Rollup pass complete"
        );

        Ok(output)
    }
}
