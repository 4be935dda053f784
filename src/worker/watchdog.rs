//! Liveness watchdog — periodic scanner over the worker registry.
//!
//! Each tick classifies every worker as dead, zombie, stalled, or
//! healthy, in that precedence order. Dead workers are cleaned up
//! without signaling; zombies and stalls get the escalation kill
//! protocol. Kills for different devices run concurrently so one slow
//! exit never delays the rest of the fleet.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::probe;
use crate::worker::now_millis;
use crate::worker::registry::WorkerRegistry;

/// Spawn the background watchdog loop. Scans at the configured interval
/// until the `CancellationToken` fires.
#[must_use]
pub fn spawn_watchdog(
    registry: Arc<WorkerRegistry>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = registry.config().scan_interval();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("watchdog shutting down");
                    break;
                }
                () = tokio::time::sleep(interval) => {}
            }
            tick(&registry).await;
        }
    })
}

/// Run one watchdog scan over the registry.
///
/// Takes a snapshot first so the registry lock is never held across
/// probes or kills; the per-device kill itself re-checks the registry
/// (the entry may have been stopped meanwhile, in which case the kill is
/// a no-op).
pub async fn tick(registry: &Arc<WorkerRegistry>) {
    let stall_threshold = registry.config().stall_threshold();
    let now = now_millis();
    let mut kills = JoinSet::new();

    for worker in registry.snapshot().await {
        let alive = probe::is_alive(worker.pid);
        let zombie = alive && probe::is_zombie(worker.pid);
        let idle = Duration::from_millis(now.saturating_sub(worker.last_activity_ms));
        let stalled = idle > stall_threshold;

        debug!(
            device_id = worker.device_id,
            pid = worker.pid,
            alive,
            zombie,
            stalled,
            idle_secs = idle.as_secs(),
            "watchdog scan"
        );

        if !alive {
            // Already gone; nothing to signal.
            info!(device_id = worker.device_id, "worker not alive, cleaning up");
            registry.cleanup_dead(&worker.device_id, worker.pid).await;
            continue;
        }

        let reason = if zombie {
            "zombie"
        } else if stalled {
            "stalled"
        } else {
            continue;
        };

        let registry = Arc::clone(registry);
        kills.spawn(async move {
            registry.kill_worker(&worker.device_id, reason).await;
        });
    }

    while kills.join_next().await.is_some() {}
}
