//! Global configuration parsing and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Watchdog, kill-protocol, and count-report timing knobs.
///
/// The scan interval and stall threshold have varied across deployments;
/// neither default is load-bearing and both are expected to be tuned per
/// site.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WatchdogConfig {
    /// Seconds between watchdog scans over the worker registry.
    #[serde(default = "default_scan_interval_seconds")]
    pub scan_interval_seconds: u64,
    /// Seconds of encoder output silence before a worker counts as stalled.
    #[serde(default = "default_stall_threshold_seconds")]
    pub stall_threshold_seconds: u64,
    /// Milliseconds between the graceful and the forced kill signal.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    /// Milliseconds the kill protocol waits for exit confirmation before
    /// giving up and cleaning up anyway. Must exceed `kill_grace_ms`.
    #[serde(default = "default_kill_timeout_ms")]
    pub kill_timeout_ms: u64,
    /// Milliseconds to wait after a kill before re-reporting the worker
    /// count, so the report does not race the exiting process.
    #[serde(default = "default_report_settle_ms")]
    pub report_settle_ms: u64,
    /// Seconds between periodic worker-count reports.
    #[serde(default = "default_report_interval_seconds")]
    pub report_interval_seconds: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: default_scan_interval_seconds(),
            stall_threshold_seconds: default_stall_threshold_seconds(),
            kill_grace_ms: default_kill_grace_ms(),
            kill_timeout_ms: default_kill_timeout_ms(),
            report_settle_ms: default_report_settle_ms(),
            report_interval_seconds: default_report_interval_seconds(),
        }
    }
}

fn default_scan_interval_seconds() -> u64 {
    60
}

fn default_stall_threshold_seconds() -> u64 {
    180
}

fn default_kill_grace_ms() -> u64 {
    2000
}

fn default_kill_timeout_ms() -> u64 {
    10_000
}

fn default_report_settle_ms() -> u64 {
    10_000
}

fn default_report_interval_seconds() -> u64 {
    60
}

/// Overlay slot-file storage and score-sync settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OverlayConfig {
    /// Directory holding the per-device overlay text files.
    #[serde(default = "default_overlay_dir")]
    pub dir: PathBuf,
    /// Milliseconds to coalesce bursts of score events per device.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            dir: default_overlay_dir(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_overlay_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_debounce_ms() -> u64 {
    150
}

/// External encoder invocation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EncoderConfig {
    /// Encoder binary name or path.
    #[serde(default = "default_encoder_binary")]
    pub binary: String,
    /// URL prefix for the live input stream; the device id is appended.
    #[serde(default)]
    pub input_stream_url: String,
    /// Font used by the overlay drawtext filters.
    #[serde(default = "default_font_path")]
    pub font_path: PathBuf,
    /// Scoreboard background image.
    #[serde(default = "default_resource_overlay")]
    pub image_path: PathBuf,
    /// Sponsor logo images, rendered top-right.
    #[serde(default = "default_resource_logo1")]
    pub logo1_path: PathBuf,
    /// Second sponsor logo.
    #[serde(default = "default_resource_logo2")]
    pub logo2_path: PathBuf,
    /// Third sponsor logo.
    #[serde(default = "default_resource_logo3")]
    pub logo3_path: PathBuf,
    /// White backing strip behind the logos.
    #[serde(default = "default_resource_bg_white")]
    pub bg_white_path: PathBuf,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            binary: default_encoder_binary(),
            input_stream_url: String::new(),
            font_path: default_font_path(),
            image_path: default_resource_overlay(),
            logo1_path: default_resource_logo1(),
            logo2_path: default_resource_logo2(),
            logo3_path: default_resource_logo3(),
            bg_white_path: default_resource_bg_white(),
        }
    }
}

fn default_encoder_binary() -> String {
    "ffmpeg".into()
}

fn default_font_path() -> PathBuf {
    PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf")
}

fn default_resource_overlay() -> PathBuf {
    PathBuf::from("resources/overlay.png")
}

fn default_resource_logo1() -> PathBuf {
    PathBuf::from("resources/logo1.png")
}

fn default_resource_logo2() -> PathBuf {
    PathBuf::from("resources/logo2.png")
}

fn default_resource_logo3() -> PathBuf {
    PathBuf::from("resources/logo3.png")
}

fn default_resource_bg_white() -> PathBuf {
    PathBuf::from("resources/bg_white.png")
}

fn default_http_port() -> u16 {
    3000
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Port for the HTTP command surface and the device WebSocket channel.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Aggregator endpoint receiving periodic `{current}` PUTs.
    /// Reporting is disabled when absent.
    #[serde(default)]
    pub report_url: Option<String>,
    /// Watchdog and kill-protocol timing.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    /// Overlay storage and debounce settings.
    #[serde(default)]
    pub overlay: OverlayConfig,
    /// Encoder invocation settings.
    #[serde(default)]
    pub encoder: EncoderConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Interval between watchdog scans.
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog.scan_interval_seconds)
    }

    /// Output-silence threshold before a worker counts as stalled.
    #[must_use]
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.watchdog.stall_threshold_seconds)
    }

    /// Delay between the graceful and the forced kill signal.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.watchdog.kill_grace_ms)
    }

    /// Bound on the whole kill protocol, measured from the first signal.
    #[must_use]
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog.kill_timeout_ms)
    }

    /// Settle delay before the post-kill count re-report.
    #[must_use]
    pub fn report_settle(&self) -> Duration {
        Duration::from_millis(self.watchdog.report_settle_ms)
    }

    /// Interval between periodic count reports.
    #[must_use]
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog.report_interval_seconds)
    }

    /// Per-device score-event debounce window.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.overlay.debounce_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.watchdog.scan_interval_seconds == 0 {
            return Err(AppError::Config(
                "watchdog.scan_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.watchdog.stall_threshold_seconds == 0 {
            return Err(AppError::Config(
                "watchdog.stall_threshold_seconds must be greater than zero".into(),
            ));
        }
        if self.watchdog.kill_timeout_ms <= self.watchdog.kill_grace_ms {
            return Err(AppError::Config(
                "watchdog.kill_timeout_ms must exceed watchdog.kill_grace_ms".into(),
            ));
        }
        if self.encoder.input_stream_url.is_empty() {
            return Err(AppError::Config(
                "encoder.input_stream_url must be set".into(),
            ));
        }
        Ok(())
    }
}
