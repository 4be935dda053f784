//! Worker registry — the single source of truth for active workers.
//!
//! Maps device identity to its worker record and enforces the
//! single-active-worker invariant: at most one non-terminated worker per
//! device id. All map mutation happens behind one lock; starting a
//! worker reserves the slot and spawns under that lock so two concurrent
//! starts for the same device yield exactly one subprocess.

use std::collections::HashMap;
use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

use crate::config::GlobalConfig;
use crate::overlay::store::{OverlayFields, OverlayStore};
use crate::overlay::sync::{OverlaySync, ScorePayload};
use crate::probe;
use crate::worker::killer::{self, KillConclusion};
use crate::worker::{reporter, spawner, LifecycleState, Worker};
use crate::{AppError, Result};

/// Parameters for starting one worker.
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Device to bind the worker to.
    pub device_id: String,
    /// Base output URL; the stream key is appended.
    pub output_url: String,
    /// Stream key appended to the output URL.
    pub stream_key: String,
    /// Initial overlay field values; unspecified slots get defaults.
    pub overlay_init: OverlayFields,
}

/// Result of a start call.
///
/// `created == false` means a worker for the device already existed;
/// that is an informational outcome, not an error.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    /// Whether this call created the worker.
    pub created: bool,
    /// Device the outcome refers to.
    pub device_id: String,
    /// Pid of the (new or already-running) worker, when known.
    pub pid: Option<i32>,
}

/// Result of a stop call. `stopped == false` means nothing was running
/// for the device — informational, not an error.
#[derive(Debug, Clone, Copy)]
pub struct StopOutcome {
    /// Whether a worker existed and was stopped.
    pub stopped: bool,
}

/// Point-in-time view of one worker, taken by the watchdog without
/// holding the registry lock across probes or kills.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    /// Device the worker serves.
    pub device_id: String,
    /// Leader pid of its process group.
    pub pid: i32,
    /// Millis-since-epoch of its last observed output.
    pub last_activity_ms: u64,
}

/// Registry of active workers, shared across the HTTP surface, the
/// watchdog, and the count reporter.
pub struct WorkerRegistry {
    config: Arc<GlobalConfig>,
    workers: Mutex<HashMap<String, Worker>>,
    http: reqwest::Client,
}

impl WorkerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Arc<Self> {
        Arc::new(Self {
            config,
            workers: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
        })
    }

    /// The configuration the registry and its timer tasks run under.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Start a worker for a device.
    ///
    /// Atomically reserves the device slot, creates the overlay files,
    /// and spawns the encoder. If a worker already exists the call is a
    /// no-op reporting the existing instance (`created = false`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if a required parameter is empty
    /// (rejected before any side effect), or `AppError::Spawn`/`Io` if
    /// overlay creation or the launch fails — in which case nothing is
    /// registered and any created files are removed.
    pub async fn start(self: &Arc<Self>, req: StartRequest) -> Result<StartOutcome> {
        if req.device_id.is_empty() || req.output_url.is_empty() || req.stream_key.is_empty() {
            return Err(AppError::Validation(
                "deviceid, url, and streamkey are required".into(),
            ));
        }
        let span = info_span!("start_worker", device_id = req.device_id);
        let _guard = span.enter();

        let output_url = format!(
            "{}/{}",
            req.output_url.trim_end_matches('/'),
            req.stream_key
        );

        let mut workers = self.workers.lock().await;
        if let Some(existing) = workers.get(&req.device_id) {
            info!(device_id = req.device_id, "worker already running");
            return Ok(StartOutcome {
                created: false,
                device_id: req.device_id,
                pid: Some(existing.pid),
            });
        }

        // Slot reserved while the lock is held; a concurrent start for the
        // same device waits here and then observes the inserted entry.
        let store = OverlayStore::new(&req.device_id, &self.config.overlay.dir);
        store.create(&req.overlay_init)?;

        let spawned =
            match spawner::spawn_encoder(&self.config.encoder, &req.device_id, &output_url, &store)
            {
                Ok(spawned) => spawned,
                Err(err) => {
                    store.remove();
                    return Err(err);
                }
            };

        let sync = OverlaySync::new(
            store.clone(),
            self.config.debounce(),
            CancellationToken::new(),
        )
        .spawn();

        let worker = Worker {
            device_id: req.device_id.clone(),
            pid: spawned.pid,
            output_url,
            store,
            last_activity: Arc::clone(&spawned.last_activity),
            state: LifecycleState::Running,
            exited: spawned.exited.clone(),
            sync,
        };
        workers.insert(req.device_id.clone(), worker);
        drop(workers);

        self.watch_exit(req.device_id.clone(), spawned.pid, spawned.exited);

        Ok(StartOutcome {
            created: true,
            device_id: req.device_id,
            pid: Some(spawned.pid),
        })
    }

    /// Write the supplied overlay fields for a device, leaving all other
    /// slots untouched. Returns `false` when no worker is active.
    pub async fn update_overlay(&self, device_id: &str, fields: &OverlayFields) -> bool {
        let workers = self.workers.lock().await;
        let Some(worker) = workers.get(device_id) else {
            return false;
        };
        if let Err(err) = worker.store.apply(fields) {
            warn!(device_id, %err, "overlay field write failed");
        }
        true
    }

    /// Route a score event into the device's synchronizer. Returns
    /// `false` when no worker is active or the event could not be queued.
    pub async fn score_event(&self, device_id: &str, payload: ScorePayload) -> bool {
        let workers = self.workers.lock().await;
        workers
            .get(device_id)
            .is_some_and(|worker| worker.sync.send(payload))
    }

    /// Stop a device's worker gracefully. Idempotent: stopping an
    /// unknown device reports `stopped = false`.
    ///
    /// The entry and its overlay files are gone when this returns; the
    /// process itself may still be exiting.
    pub async fn stop(&self, device_id: &str) -> StopOutcome {
        let Some(mut worker) = self.take_entry(device_id).await else {
            return StopOutcome { stopped: false };
        };
        worker.state = LifecycleState::Stopping;
        killer::signal_with_fallback(worker.pid, Signal::SIGTERM);
        Self::teardown(&mut worker);
        info!(
            device_id,
            pid = worker.pid,
            output_url = %worker.output_url,
            "worker stopped"
        );
        StopOutcome { stopped: true }
    }

    /// Forcibly terminate a device's worker via the escalation kill
    /// protocol, then release its resources and schedule a settle-delayed
    /// count re-report. Returns `false` when no worker was active or a
    /// kill for the device is already in flight.
    ///
    /// The entry stays registered (state `Stopping`) for the whole
    /// protocol, so a concurrent `start` for the same device keeps
    /// reporting the existing worker instead of spawning a successor
    /// mid-kill. The removal at conclusion is pid-checked: if a `stop`
    /// raced the protocol and a successor already took the slot, the
    /// successor is left untouched.
    pub async fn kill_worker(self: &Arc<Self>, device_id: &str, reason: &str) -> bool {
        let (pid, exited) = {
            let mut workers = self.workers.lock().await;
            let Some(worker) = workers.get_mut(device_id) else {
                return false;
            };
            if worker.state == LifecycleState::Stopping {
                return false;
            }
            worker.state = LifecycleState::Stopping;
            (worker.pid, worker.exited.clone())
        };

        let conclusion = killer::escalate(
            device_id,
            pid,
            exited,
            self.config.kill_grace(),
            self.config.kill_timeout(),
            reason,
        )
        .await;
        if conclusion == KillConclusion::GaveUp {
            // Fail-safe: never keep tracking a process the protocol gave
            // up on. Cleanup proceeds regardless.
            let err = AppError::KillTimeout(format!("worker {device_id} did not confirm exit"));
            warn!(device_id, pid, %err, "continuing cleanup after kill timeout");
        }
        // The exit watcher or a racing stop may have released the entry
        // already; whoever removes it runs teardown exactly once.
        if let Some(mut worker) = self.take_entry_if_pid(device_id, pid).await {
            Self::teardown(&mut worker);
        }
        self.schedule_report();
        true
    }

    /// Remove a worker whose process is already gone: release resources
    /// without signaling anything. The removal is pid-checked so a stale
    /// exit notification never tears down a successor worker that reused
    /// the device id. Returns `false` when no matching entry existed.
    pub async fn cleanup_dead(&self, device_id: &str, pid: i32) -> bool {
        let Some(mut worker) = self.take_entry_if_pid(device_id, pid).await else {
            return false;
        };
        Self::teardown(&mut worker);
        info!(device_id, pid, "dead worker cleaned up");
        true
    }

    /// Whether a worker entry exists for the device.
    pub async fn is_active(&self, device_id: &str) -> bool {
        self.workers.lock().await.contains_key(device_id)
    }

    /// Number of registered workers whose process currently probes alive.
    pub async fn count_active(&self) -> usize {
        let workers = self.workers.lock().await;
        workers
            .values()
            .filter(|worker| probe::is_alive(worker.pid))
            .count()
    }

    /// Point-in-time view of every worker, for the watchdog scan.
    pub async fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let workers = self.workers.lock().await;
        workers
            .values()
            .map(|worker| WorkerSnapshot {
                device_id: worker.device_id.clone(),
                pid: worker.pid,
                last_activity_ms: worker.last_activity_ms(),
            })
            .collect()
    }

    /// Report the current active-worker count to the aggregator once.
    /// Failures are logged and swallowed; the next tick retries.
    pub async fn report_once(&self) {
        let Some(url) = self.config.report_url.as_deref().filter(|u| !u.is_empty()) else {
            return;
        };
        let current = self.count_active().await;
        match reporter::put_count(&self.http, url, current).await {
            Ok(()) => info!(current, "worker count reported"),
            Err(err) => warn!(%err, "worker count report failed"),
        }
    }

    /// Stop every worker. Used at daemon shutdown.
    pub async fn stop_all(&self) {
        let device_ids: Vec<String> = {
            let workers = self.workers.lock().await;
            workers.keys().cloned().collect()
        };
        for device_id in device_ids {
            self.stop(&device_id).await;
        }
    }

    /// Remove the map entry for a device, if present. The caller owns
    /// the returned worker and is responsible for teardown.
    async fn take_entry(&self, device_id: &str) -> Option<Worker> {
        self.workers.lock().await.remove(device_id)
    }

    /// Remove the map entry for a device only while it still refers to
    /// the given pid, so callers holding a stale reference cannot remove
    /// a successor entry.
    async fn take_entry_if_pid(&self, device_id: &str, pid: i32) -> Option<Worker> {
        let mut workers = self.workers.lock().await;
        if workers.get(device_id).is_some_and(|worker| worker.pid == pid) {
            workers.remove(device_id)
        } else {
            None
        }
    }

    /// Release a removed worker's resources: cancel its synchronizer
    /// (discarding any pending debounced write) and unlink its overlay
    /// files.
    fn teardown(worker: &mut Worker) {
        worker.state = LifecycleState::Terminated;
        worker.sync.cancel();
        worker.store.remove();
    }

    /// Watch for the encoder exiting on its own; exit is the
    /// authoritative trigger for releasing the entry when neither stop
    /// nor the watchdog got there first. The watcher carries the pid it
    /// was spawned for, so once the device restarts this notification
    /// can no longer touch the registry.
    fn watch_exit(self: &Arc<Self>, device_id: String, pid: i32, mut exited: watch::Receiver<bool>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            killer::wait_exit(&mut exited).await;
            if registry.cleanup_dead(&device_id, pid).await {
                info!(device_id, "worker removed after self-exit");
            }
        });
    }

    /// Re-report the worker count after the settle delay, so the report
    /// does not race the process that was just killed.
    fn schedule_report(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let delay = self.config.report_settle();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.report_once().await;
        });
    }
}
