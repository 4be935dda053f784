//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// "Already running" and "no such worker" are deliberately NOT errors —
/// they are informational outcomes surfaced by the registry's result
/// structs so that callers can keep going.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Required request parameters missing or malformed; rejected before
    /// any side effect.
    Validation(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// External encoder process failed to launch; no worker registered.
    Spawn(String),
    /// Liveness/zombie probe read failure.
    Probe(String),
    /// Escalation kill safety timeout elapsed without an observed exit.
    /// Cleanup proceeds anyway.
    KillTimeout(String),
    /// Count-report network failure; logged and retried on the next tick.
    Report(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Probe(msg) => write!(f, "probe: {msg}"),
            Self::KillTimeout(msg) => write!(f, "kill timeout: {msg}"),
            Self::Report(msg) => write!(f, "report: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Report(err.to_string())
    }
}
