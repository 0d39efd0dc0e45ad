//! Short-lived query result cache
//!
//! Caches raw partition-scan results keyed by the canonical filter
//! serialization. Entries expire after 30 seconds on the injected
//! clock; any backend settings change invalidates the whole cache
//! unconditionally. Process-local only - there is no cross-process
//! coordination, and none is needed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use metershare_core::domain::aggregate::UsageAggregateRow;
use metershare_core::ports::clock::IClock;

/// How long a cached result set stays valid
pub const QUERY_CACHE_TTL_SECS: i64 = 30;

struct CacheEntry {
    rows: Arc<Vec<UsageAggregateRow>>,
    stored_at: DateTime<Utc>,
}

/// TTL cache for query result sets
pub struct QueryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn IClock>,
    ttl: Duration,
}

impl QueryCache {
    /// Creates an empty cache on the given clock
    pub fn new(clock: Arc<dyn IClock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            ttl: Duration::seconds(QUERY_CACHE_TTL_SECS),
        }
    }

    /// Returns the cached rows for `key`, unless expired
    pub fn get(&self, key: &str) -> Option<Arc<Vec<UsageAggregateRow>>> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.stored_at + self.ttl > now {
                return Some(entry.rows.clone());
            }
        }
        // Expired entries are dropped on access.
        self.entries.remove(key);
        None
    }

    /// Stores a result set and returns the shared handle to it
    pub fn insert(&self, key: String, rows: Vec<UsageAggregateRow>) -> Arc<Vec<UsageAggregateRow>> {
        let rows = Arc::new(rows);
        self.entries.insert(
            key,
            CacheEntry {
                rows: rows.clone(),
                stored_at: self.clock.now(),
            },
        );
        rows
    }

    /// Drops every entry; called on any backend settings change
    pub fn invalidate_all(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        debug!(dropped, "Query cache invalidated");
    }

    /// Number of live (possibly expired) entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
