#![forbid(unsafe_code)]

//! Livestream overlay supervisor.
//!
//! Supervises one external transcoding process per capture device, keeps
//! each process's on-disk scoreboard overlay files synchronized with
//! inbound score events, and self-heals the fleet via a periodic
//! liveness/zombie/stall watchdog.

pub mod config;
pub mod errors;
pub mod http;
pub mod overlay;
pub mod probe;
pub mod push;
pub mod worker;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
