//! Escalation kill protocol.
//!
//! Two-phase termination for one encoder process group: a graceful
//! SIGTERM, a grace timer, then a forced SIGKILL, with the whole
//! operation bounded by a safety timeout. Signals target the process
//! group so encoder helper processes die together; when group delivery
//! fails, the leader alone is signaled.

use std::time::Duration;

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How an escalation kill concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillConclusion {
    /// The exit notification fired before the safety timeout.
    Exited,
    /// The safety timeout elapsed without an observed exit; the caller
    /// proceeds with cleanup anyway and stops tracking the process.
    GaveUp,
}

/// Deliver a signal to the process group, falling back to the leader pid
/// when group delivery fails.
pub fn signal_with_fallback(pid: i32, sig: Signal) {
    if let Err(err) = killpg(Pid::from_raw(pid), sig) {
        debug!(pid, ?sig, %err, "group signal failed, signaling leader only");
        if let Err(err) = kill(Pid::from_raw(pid), sig) {
            warn!(pid, ?sig, %err, "leader signal failed");
        }
    }
}

/// Resolve once the exit notification has fired.
///
/// A dropped sender also resolves: the spawner only drops it after
/// reaping the child.
pub async fn wait_exit(exited: &mut watch::Receiver<bool>) {
    if *exited.borrow() {
        return;
    }
    while exited.changed().await.is_ok() {
        if *exited.borrow() {
            return;
        }
    }
}

/// Run the escalation kill protocol against one worker's process group.
///
/// 1. SIGTERM to the group (leader fallback).
/// 2. If no exit within `grace`, SIGKILL to the group, exactly once.
/// 3. Conclude on the exit notification or when `timeout` (measured from
///    the first signal) elapses — whichever comes first.
///
/// A [`KillConclusion::GaveUp`] outcome is logged as a kill timeout; the
/// OS-level termination is not re-verified.
pub async fn escalate(
    device_id: &str,
    pid: i32,
    mut exited: watch::Receiver<bool>,
    grace: Duration,
    timeout: Duration,
    reason: &str,
) -> KillConclusion {
    info!(device_id, pid, reason, "killing encoder");
    signal_with_fallback(pid, Signal::SIGTERM);

    let protocol = async {
        tokio::select! {
            () = wait_exit(&mut exited) => {}
            () = tokio::time::sleep(grace) => {
                warn!(device_id, pid, "no exit within grace period, forcing kill");
                signal_with_fallback(pid, Signal::SIGKILL);
                wait_exit(&mut exited).await;
            }
        }
    };

    match tokio::time::timeout(timeout, protocol).await {
        Ok(()) => {
            info!(device_id, pid, "encoder terminated");
            KillConclusion::Exited
        }
        Err(_) => {
            warn!(
                device_id,
                pid, "kill safety timeout elapsed without observed exit, cleaning up anyway"
            );
            KillConclusion::GaveUp
        }
    }
}
