#![forbid(unsafe_code)]

//! `streamvisor` — livestream overlay supervisor daemon.
//!
//! Bootstraps configuration, the worker registry, the watchdog and
//! count-reporter timers, and the HTTP command surface with its device
//! WebSocket channel.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use streamvisor::config::GlobalConfig;
use streamvisor::http::{self, AppState};
use streamvisor::push::PushRooms;
use streamvisor::worker::registry::WorkerRegistry;
use streamvisor::worker::{reporter, watchdog};
use streamvisor::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "streamvisor", about = "Livestream overlay supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port from the configuration file.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("streamvisor bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    let config = Arc::new(config);
    info!(
        scan_interval_secs = config.watchdog.scan_interval_seconds,
        stall_threshold_secs = config.watchdog.stall_threshold_seconds,
        "configuration loaded"
    );

    // ── Build shared state ──────────────────────────────
    let registry = WorkerRegistry::new(Arc::clone(&config));
    let rooms = Arc::new(PushRooms::new());
    let cancel = CancellationToken::new();

    // ── Start timer tasks ───────────────────────────────
    let watchdog_handle = watchdog::spawn_watchdog(Arc::clone(&registry), cancel.clone());
    let reporter_handle = reporter::spawn_count_reporter(Arc::clone(&registry), cancel.clone());
    info!("watchdog and count reporter started");

    // ── Start the HTTP surface ──────────────────────────
    let state = AppState {
        registry: Arc::clone(&registry),
        rooms,
    };
    let http_cancel = cancel.clone();
    let http_port = config.http_port;
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve_http(state, http_port, http_cancel).await {
            error!(%err, "http surface failed");
        }
    });

    info!(port = config.http_port, "streamvisor ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    cancel.cancel();

    // Stop every worker before exiting so no orphaned encoder keeps
    // streaming against a dead supervisor.
    registry.stop_all().await;

    let _ = tokio::join!(watchdog_handle, reporter_handle, http_handle);
    info!("streamvisor shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
