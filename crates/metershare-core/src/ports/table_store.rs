//! Table store port (driven/secondary port)
//!
//! Interface to the shared partitioned table store. The primary
//! implementation targets the Azure Table REST surface, but the trait is
//! deliberately narrow - upsert, partition query, filtered delete - so
//! tests substitute an in-memory fake.
//!
//! ## Design Notes
//!
//! - Upserts are merge-replacements of freshly recomputed daily totals.
//!   Nothing may ever increment a remote row; conflicting writers from
//!   multiple machines converge precisely because every write is
//!   "replace with the full local total".
//! - Errors are typed so the sync engine can report permission failures
//!   (write vs delete) distinctly from auth and network failures.

use std::time::Duration;

use thiserror::Error;

use crate::domain::aggregate::UsageAggregateRow;

/// Which store capability a request exercised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Write,
    Query,
    Delete,
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Write => "write",
            Self::Query => "query",
            Self::Delete => "delete",
        };
        write!(f, "{name}")
    }
}

/// Errors surfaced by table store adapters
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Missing or invalid credential
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The credential is valid but lacks the role for this operation
    #[error("permission denied for {operation} operation: {detail}")]
    PermissionDenied {
        operation: StoreOperation,
        detail: String,
    },

    /// Connection-level failure (DNS, refused, reset)
    #[error("network error: {0}")]
    Network(String),

    /// The bounded per-call timeout elapsed; the batch counts as fully
    /// failed and is retried on the next scheduled tick
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A filter value failed injection-prevention validation
    #[error("invalid filter value: {0}")]
    InvalidFilter(String),

    /// Any other HTTP-level failure from the table service
    #[error("table service returned HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    /// Response body could not be interpreted
    #[error("malformed table service response: {0}")]
    Malformed(String),
}

impl StoreError {
    /// Whether the failure should be deferred to the next scheduled tick
    /// (as opposed to being permanent until reconfiguration)
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
            || matches!(self, Self::Http { status, .. } if *status >= 500 || *status == 429)
    }
}

/// Port trait for partitioned table store operations
#[async_trait::async_trait]
pub trait ITableStore: Send + Sync {
    /// Merge-upserts one batch of rows.
    ///
    /// Rows the store confirmed before a mid-batch failure stay written;
    /// the adapter must not roll them back. The caller treats the whole
    /// batch as failed and relies on next-cycle recomputation.
    async fn upsert_batch(&self, rows: &[UsageAggregateRow]) -> Result<(), StoreError>;

    /// Returns every row in `partition_key`, optionally narrowed by a
    /// pre-validated filter expression.
    async fn query_partition(
        &self,
        partition_key: &str,
        filter: Option<&str>,
    ) -> Result<Vec<UsageAggregateRow>, StoreError>;

    /// Deletes the rows in `partition_key` matching `filter`; returns how
    /// many were removed. Missing rows are not an error.
    async fn delete_where(&self, partition_key: &str, filter: &str) -> Result<u64, StoreError>;
}
