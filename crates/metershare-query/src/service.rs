//! Query service
//!
//! Executes filtered aggregate reads: one partition scan per day in the
//! requested range (inclusive of both ends), equality filters pushed
//! server-side where the store supports them and re-applied client-side,
//! then grouped aggregation with deterministic ordering.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use thiserror::Error;
use tracing::debug;

use metershare_core::domain::aggregate::UsageAggregateRow;
use metershare_core::domain::errors::DomainError;
use metershare_core::domain::newtypes::DatasetId;
use metershare_core::ports::clock::IClock;
use metershare_core::ports::table_store::{ITableStore, StoreError};
use metershare_table::filter::FilterBuilder;

use crate::cache::QueryCache;

/// Widest accepted query range, in days
const MAX_RANGE_DAYS: i64 = 366;

/// Errors surfaced by the query service
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Caller-supplied filter set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilters {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub model: Option<String>,
    pub workspace_id: Option<String>,
    pub machine_id: Option<String>,
    pub user_id: Option<String>,
}

impl QueryFilters {
    /// A filter covering just the given range
    #[must_use]
    pub fn range(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            model: None,
            workspace_id: None,
            machine_id: None,
            user_id: None,
        }
    }

    /// Validates the date range
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.start_date > self.end_date {
            return Err(DomainError::InvalidDateRange(format!(
                "start {} is after end {}",
                self.start_date, self.end_date
            )));
        }
        let span = (self.end_date - self.start_date).num_days() + 1;
        if span > MAX_RANGE_DAYS {
            return Err(DomainError::InvalidDateRange(format!(
                "range spans {span} days, maximum is {MAX_RANGE_DAYS}"
            )));
        }
        Ok(())
    }

    /// Canonical serialization of the filter set; the cache key
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!(
            "start={}|end={}|model={}|workspace={}|machine={}|user={}",
            self.start_date,
            self.end_date,
            self.model.as_deref().unwrap_or(""),
            self.workspace_id.as_deref().unwrap_or(""),
            self.machine_id.as_deref().unwrap_or(""),
            self.user_id.as_deref().unwrap_or(""),
        )
    }

    fn matches(&self, row: &UsageAggregateRow) -> bool {
        if let Some(model) = &self.model {
            if &row.model != model {
                return false;
            }
        }
        if let Some(workspace) = &self.workspace_id {
            if &row.workspace_id != workspace {
                return false;
            }
        }
        if let Some(machine) = &self.machine_id {
            if &row.machine_id != machine {
                return false;
            }
        }
        if let Some(user) = &self.user_id {
            if row.user_id.as_ref() != Some(user) {
                return false;
            }
        }
        true
    }
}

/// Dimension the aggregation groups by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupDimension {
    Day,
    Model,
    Workspace,
    Machine,
    User,
}

impl GroupDimension {
    fn key_for(self, row: &UsageAggregateRow) -> String {
        match self {
            Self::Day => row.day.format("%Y-%m-%d").to_string(),
            Self::Model => row.model.clone(),
            Self::Workspace => row.workspace_id.clone(),
            Self::Machine => row.machine_id.clone(),
            Self::User => row
                .user_id
                .clone()
                .unwrap_or_else(|| "(anonymous)".to_string()),
        }
    }
}

/// One aggregated group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateBucket {
    pub key: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub interactions: u64,
}

impl AggregateBucket {
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Result of an aggregate query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateResult {
    /// Buckets ordered by total tokens descending, then key ascending
    pub buckets: Vec<AggregateBucket>,
    /// Raw rows the aggregation consumed
    pub rows_scanned: usize,
    /// Whether the result set came from the cache
    pub from_cache: bool,
}

/// Executes filtered aggregate reads with a short-lived result cache
pub struct QueryService {
    store: Arc<dyn ITableStore>,
    cache: QueryCache,
    dataset_id: RwLock<DatasetId>,
}

impl QueryService {
    /// Creates a service over the given store, dataset, and clock
    pub fn new(store: Arc<dyn ITableStore>, dataset_id: DatasetId, clock: Arc<dyn IClock>) -> Self {
        Self {
            store,
            cache: QueryCache::new(clock),
            dataset_id: RwLock::new(dataset_id),
        }
    }

    /// Points the service at a different dataset, dropping every cached
    /// result. Called on any backend settings change.
    pub fn set_dataset(&self, dataset_id: DatasetId) {
        *self.dataset_id.write().expect("dataset lock poisoned") = dataset_id;
        self.cache.invalidate_all();
    }

    /// Drops every cached result set
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Runs an aggregate query.
    ///
    /// Expands the date range into one partition scan per day, inclusive
    /// of both ends. Equality filters are pushed into the store's filter
    /// expression and re-applied client-side, so stores that ignore
    /// filters still produce correct results.
    pub async fn query(
        &self,
        filters: &QueryFilters,
        group_by: GroupDimension,
    ) -> Result<AggregateResult, QueryError> {
        filters.validate()?;

        let key = filters.cache_key();
        if let Some(rows) = self.cache.get(&key) {
            debug!(key, "Query served from cache");
            return Ok(aggregate(&rows, group_by, true));
        }

        let server_filter = FilterBuilder::new()
            .and_eq_opt("Model", filters.model.as_deref())?
            .and_eq_opt("WorkspaceId", filters.workspace_id.as_deref())?
            .and_eq_opt("MachineId", filters.machine_id.as_deref())?
            .and_eq_opt("UserId", filters.user_id.as_deref())?
            .build();

        let dataset_id = self
            .dataset_id
            .read()
            .expect("dataset lock poisoned")
            .clone();

        let mut rows = Vec::new();
        let mut day = filters.start_date;
        while day <= filters.end_date {
            let partition_key = UsageAggregateRow::partition_key_for(&dataset_id, day);
            let scanned = self
                .store
                .query_partition(&partition_key, server_filter.as_deref())
                .await?;
            rows.extend(scanned);
            day = day.succ_opt().expect("date overflow");
        }

        rows.retain(|row| filters.matches(row));
        debug!(key, rows = rows.len(), "Query scanned partitions");

        let rows = self.cache.insert(key, rows);
        Ok(aggregate(&rows, group_by, false))
    }
}

/// Groups and sums rows; ties broken by total tokens descending, then
/// identifier ascending, for deterministic output.
fn aggregate(
    rows: &[UsageAggregateRow],
    group_by: GroupDimension,
    from_cache: bool,
) -> AggregateResult {
    let mut grouped: BTreeMap<String, AggregateBucket> = BTreeMap::new();

    for row in rows {
        let key = group_by.key_for(row);
        let bucket = grouped.entry(key.clone()).or_insert(AggregateBucket {
            key,
            input_tokens: 0,
            output_tokens: 0,
            interactions: 0,
        });
        bucket.input_tokens = bucket.input_tokens.saturating_add(row.input_tokens);
        bucket.output_tokens = bucket.output_tokens.saturating_add(row.output_tokens);
        bucket.interactions = bucket.interactions.saturating_add(row.interactions);
    }

    let mut buckets: Vec<AggregateBucket> = grouped.into_values().collect();
    buckets.sort_by(|a, b| {
        b.total_tokens()
            .cmp(&a.total_tokens())
            .then_with(|| a.key.cmp(&b.key))
    });

    AggregateResult {
        buckets,
        rows_scanned: rows.len(),
        from_cache,
    }
}
