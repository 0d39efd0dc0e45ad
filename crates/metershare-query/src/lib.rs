//! Metershare Query - filtered aggregate reads
//!
//! Expands a date-range filter into per-day partition scans against the
//! table store, aggregates the matched rows by a caller-chosen
//! dimension, and caches result sets for a short TTL.

pub mod cache;
pub mod service;

pub use cache::QueryCache;
pub use service::{
    AggregateBucket, AggregateResult, GroupDimension, QueryError, QueryFilters, QueryService,
};
