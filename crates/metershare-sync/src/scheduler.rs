//! Sync scheduler - periodic ticks plus on-demand manual triggers
//!
//! The [`SyncScheduler`] drives cycle runs on a fixed interval derived
//! from the configured lookback window, and accepts manual "sync now"
//! requests through a [`SyncHandle`]. Both paths call the same cycle
//! callback; coalescing of overlapping triggers happens inside the
//! engine's in-flight guard, not here.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::CycleOutcome;

/// Shortest scheduling interval (15 minutes)
const INTERVAL_MIN_SECS: u64 = 900;

/// Longest scheduling interval (6 hours)
const INTERVAL_MAX_SECS: u64 = 21_600;

/// Slices of the lookback window per interval derivation
const WINDOW_SLICES: u64 = 96;

/// Derives the periodic sync interval from the lookback window.
///
/// One ninety-sixth of the window, clamped to [15 min, 6 h]: a 1-day
/// lookback syncs every 15 minutes, a 30-day lookback every 6 hours.
#[must_use]
pub fn sync_interval(lookback_days: u32) -> Duration {
    let window_secs = u64::from(lookback_days) * 86_400;
    Duration::from_secs((window_secs / WINDOW_SLICES).clamp(INTERVAL_MIN_SECS, INTERVAL_MAX_SECS))
}

/// Handle for requesting an immediate sync
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<()>,
}

impl SyncHandle {
    /// Requests an immediate sync cycle.
    ///
    /// Returns `false` when the scheduler is gone or a request is
    /// already pending; a pending request is enough, duplicates are
    /// deliberately dropped.
    pub fn request_sync(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => {
                info!("Manual sync requested");
                true
            }
            Err(_) => {
                debug!("Manual sync request dropped (pending or scheduler stopped)");
                false
            }
        }
    }
}

/// Drives periodic and manual sync triggers
pub struct SyncScheduler {
    trigger_rx: mpsc::Receiver<()>,
    interval: Duration,
}

impl SyncScheduler {
    /// Creates a scheduler and its manual-trigger handle
    pub fn new(interval: Duration) -> (Self, SyncHandle) {
        // Capacity 1: one pending manual request is all that is useful.
        let (tx, trigger_rx) = mpsc::channel(1);
        info!(interval_secs = interval.as_secs(), "Creating sync scheduler");
        (
            Self {
                trigger_rx,
                interval,
            },
            SyncHandle { tx },
        )
    }

    /// Main scheduling loop.
    ///
    /// Fires `cycle` on every interval tick (including one immediately on
    /// start) and on every manual request. Terminates when every
    /// [`SyncHandle`] has been dropped.
    pub async fn run<F, Fut>(&mut self, mut cycle: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CycleOutcome>,
    {
        info!("Sync scheduler starting");
        let mut timer = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let outcome = cycle().await;
                    debug!(outcome = ?outcome_label(&outcome), "Scheduled sync tick finished");
                }
                trigger = self.trigger_rx.recv() => {
                    match trigger {
                        Some(()) => {
                            let outcome = cycle().await;
                            debug!(outcome = ?outcome_label(&outcome), "Manual sync finished");
                        }
                        None => {
                            info!("All sync handles dropped, scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        }

        info!("Sync scheduler stopped");
    }
}

fn outcome_label(outcome: &CycleOutcome) -> &'static str {
    match outcome {
        CycleOutcome::Completed(_) => "completed",
        CycleOutcome::AlreadyRunning => "already-running",
        CycleOutcome::SharingDisabled => "sharing-disabled",
        CycleOutcome::Failed(_) => "failed",
    }
}
