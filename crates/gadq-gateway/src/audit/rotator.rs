//! Periodic size check for the audit log.
//!
//! Complements inline rotation for quiet periods: wakes every interval and
//! rotates if the active file is over threshold. Errors (including a panicked
//! check) are logged and the loop keeps going; only `stop` ends it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::log::AuditLog;

/// Handle to a running rotation task.
pub struct RotatorHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

impl RotatorHandle {
    /// Spawn the rotation loop on the current tokio runtime.
    pub fn spawn(log: Arc<AuditLog>, every: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let join = tokio::spawn(async move { run(log, every, token).await });
        Self { shutdown, join }
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "audit rotator task ended abnormally");
        }
    }
}

async fn run(log: Arc<AuditLog>, every: Duration, shutdown: CancellationToken) {
    tracing::info!(interval_s = every.as_secs(), path = %log.path().display(), "audit rotator started");

    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let log = Arc::clone(&log);
                match tokio::task::spawn_blocking(move || log.rotate_if_oversized()).await {
                    Ok(Ok(Some(archive))) => {
                        tracing::debug!(archive = %archive.display(), "periodic rotation");
                    }
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "periodic rotation failed"),
                    Err(e) => tracing::warn!(error = %e, "periodic rotation panicked"),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }

    tracing::info!("audit rotator stopped");
}
