//! Worker supervision: registry, spawning, kill protocol, watchdog,
//! and count reporting.
//!
//! A worker is one external encoder process bound to one capture device,
//! together with the overlay files it polls and the synchronizer feeding
//! them.

pub mod killer;
pub mod registry;
pub mod reporter;
pub mod spawner;
pub mod watchdog;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::watch;

use crate::overlay::store::OverlayStore;
use crate::overlay::sync::SyncHandle;

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Encoder running and supervised.
    Running,
    /// Graceful stop or escalation kill in progress; the entry stays
    /// registered until the protocol concludes.
    Stopping,
    /// Encoder gone; entry about to be removed.
    Terminated,
}

/// One supervised encoder process and its overlay resources.
///
/// At most one non-terminated worker exists per device id; the registry
/// enforces this.
#[derive(Debug)]
pub struct Worker {
    /// Stable device identifier; unique key in the registry.
    pub device_id: String,
    /// Leader pid of the encoder's process group.
    pub pid: i32,
    /// Destination the encoder streams to.
    pub output_url: String,
    /// Overlay slot files owned by this worker.
    pub store: OverlayStore,
    /// Millis-since-epoch of the last encoder output line.
    pub last_activity: Arc<AtomicU64>,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Flips true when the exit watcher reaps the encoder.
    pub exited: watch::Receiver<bool>,
    /// Handle to this device's score synchronizer task.
    pub sync: SyncHandle,
}

impl Worker {
    /// Millis-since-epoch of the last observed encoder output.
    #[must_use]
    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }
}

/// Current wall-clock time as millis since the UNIX epoch.
///
/// Saturates to zero if the clock reads before the epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
