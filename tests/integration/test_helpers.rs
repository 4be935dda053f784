//! Shared fixtures: encoder stand-in scripts, short-timer configs, and
//! registry construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use streamvisor::config::{EncoderConfig, GlobalConfig, OverlayConfig, WatchdogConfig};
use streamvisor::overlay::store::OverlayFields;
use streamvisor::worker::registry::{StartRequest, WorkerRegistry};

/// Write an executable shell script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write script");
    let mut perms = std::fs::metadata(&path)
        .expect("script metadata")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("mark script executable");
    path
}

/// Long-running encoder stand-in; silent, exits promptly on SIGTERM.
pub fn sleeper_encoder(dir: &Path) -> PathBuf {
    write_script(dir, "encoder-sleeper.sh", "#!/bin/sh\nexec sleep 30\n")
}

/// Stand-in that exits immediately, simulating an encoder crash.
pub fn quick_exit_encoder(dir: &Path) -> PathBuf {
    write_script(dir, "encoder-quick.sh", "#!/bin/sh\nexit 0\n")
}

/// Stand-in that ignores SIGTERM so only SIGKILL takes it down.
pub fn stubborn_encoder(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "encoder-stubborn.sh",
        "#!/bin/sh\ntrap '' TERM\nwhile :; do sleep 0.05; done\n",
    )
}

/// Configuration with test-friendly timings: overlays under
/// `overlay_dir`, the given stand-in as the encoder binary, and kill /
/// settle delays short enough to exercise within a test.
pub fn test_config(overlay_dir: &Path, binary: &Path) -> GlobalConfig {
    GlobalConfig {
        http_port: 0,
        report_url: None,
        watchdog: WatchdogConfig {
            scan_interval_seconds: 1,
            stall_threshold_seconds: 120,
            kill_grace_ms: 300,
            kill_timeout_ms: 3000,
            report_settle_ms: 50,
            report_interval_seconds: 60,
        },
        overlay: OverlayConfig {
            dir: overlay_dir.to_path_buf(),
            debounce_ms: 50,
        },
        encoder: EncoderConfig {
            binary: binary.display().to_string(),
            input_stream_url: "rtmp://ingest.example/live/".into(),
            ..EncoderConfig::default()
        },
    }
}

/// Registry over [`test_config`].
pub fn test_registry(overlay_dir: &Path, binary: &Path) -> Arc<WorkerRegistry> {
    WorkerRegistry::new(Arc::new(test_config(overlay_dir, binary)))
}

/// Registry with a custom stall threshold, for watchdog tests.
pub fn stall_registry(
    overlay_dir: &Path,
    binary: &Path,
    stall_threshold_seconds: u64,
) -> Arc<WorkerRegistry> {
    let mut config = test_config(overlay_dir, binary);
    config.watchdog.stall_threshold_seconds = stall_threshold_seconds;
    WorkerRegistry::new(Arc::new(config))
}

/// Start request with default overlay fields.
pub fn start_request(device_id: &str) -> StartRequest {
    StartRequest {
        device_id: device_id.into(),
        output_url: "rtmps://sink.example/live".into(),
        stream_key: "key-1".into(),
        overlay_init: OverlayFields::default(),
    }
}

/// Poll `f` every 25ms until it reports true or the timeout elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut f: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if f().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
