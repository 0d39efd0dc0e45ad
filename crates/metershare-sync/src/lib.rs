//! Metershare Sync - cycle orchestration and scheduling
//!
//! The [`SyncEngine`](engine::SyncEngine) drives one cycle through
//! validate → compute → upload with a single-in-flight guard; the
//! [`SyncScheduler`](scheduler::SyncScheduler) turns periodic ticks and
//! manual requests into cycle runs.

pub mod engine;
pub mod scheduler;

pub use engine::{CycleError, CycleOutcome, CyclePhase, CycleRequest, CycleSummary, SyncEngine};
pub use scheduler::{sync_interval, SyncHandle, SyncScheduler};
