//! Process liveness and zombie inspection.
//!
//! The watchdog never inspects OS internals directly; everything it needs
//! to know about a pid comes through these two probes. Both fail open:
//! a probe that cannot be answered with certainty never triggers a kill
//! on its own (`is_zombie` errs toward "not a zombie"), while `is_alive`
//! errs toward "alive" only for the permission-denied case where the
//! process demonstrably exists.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::warn;

use crate::AppError;

/// Whether the process with this pid currently exists.
///
/// Sends the null signal. `EPERM` means the process exists but is not
/// signalable by this supervisor, which still counts as alive; `ESRCH`
/// (or any other failure) means it does not.
#[must_use]
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether the process is a zombie: exited but not yet reaped.
///
/// Reads the kernel's reported run-state from `/proc/<pid>/stat`. Any
/// read or parse failure is treated as not-zombie so an uncertain probe
/// never causes a kill.
#[must_use]
pub fn is_zombie(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat_state(&stat).is_some_and(|state| state == 'Z'),
        // Gone between probes; nothing to report.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
        Err(err) => {
            let err = AppError::Probe(format!("stat read for pid {pid} failed: {err}"));
            warn!(%err, "zombie probe failed open");
            false
        }
    }
}

/// Extract the run-state character from a `/proc/<pid>/stat` line.
///
/// The line has the form `pid (comm) STATE ...`; `comm` may itself
/// contain spaces and parentheses, so the state is found after the LAST
/// closing parenthesis.
#[must_use]
pub fn stat_state(stat: &str) -> Option<char> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    after_comm.trim_start().chars().next()
}
