//! Background job loops.
//!
//! Each job runs on its own timer in a spawned task. A tick that fires while
//! the previous one is still running is skipped by the job's single-flight
//! guard. Both loops watch the process shutdown signal and exit between
//! ticks so a drain never starts new store work.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{CleanupReclaimer, SyncReconciler};

pub fn spawn_sync_loop(
    sync: Arc<SyncReconciler>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sync.run_if_idle().await {
                        Some(Ok(report)) => debug!(?report, "sync tick done"),
                        Some(Err(e)) => warn!(error = %e, "sync tick failed"),
                        None => debug!("sync tick skipped; previous tick still running"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("sync loop stopping");
                    break;
                }
            }
        }
    })
}

pub fn spawn_cleanup_loop(
    cleanup: Arc<CleanupReclaimer>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match cleanup.run_if_idle().await {
                        Some(Ok(report)) => debug!(?report, "cleanup tick done"),
                        Some(Err(e)) => warn!(error = %e, "cleanup tick failed"),
                        None => debug!("cleanup tick skipped; previous tick still running"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("cleanup loop stopping");
                    break;
                }
            }
        }
    })
}
