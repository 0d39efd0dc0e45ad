//! Metershare Rollup - daily aggregate computation
//!
//! Folds cached per-file session statistics into keyed daily
//! [`UsageAggregateRow`](metershare_core::domain::aggregate::UsageAggregateRow)s,
//! applying the active sharing policy. Output is fully deterministic for
//! identical local inputs, which is what makes repeated uploads
//! idempotent.

pub mod builder;
pub mod cache_file;
pub mod source;

pub use builder::{RollupBuilder, RollupOutput, RollupParams};
pub use cache_file::StatsCacheFile;
pub use source::FsSessionSource;
