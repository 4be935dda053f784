//! Encoder process spawner.
//!
//! Builds the ffmpeg invocation for one device and launches it in its own
//! process group so the whole group can be signaled together. The
//! encoder's output streams are observed only to track activity — they
//! are never parsed for content.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::config::EncoderConfig;
use crate::overlay::store::{OverlaySlot, OverlayStore};
use crate::worker::now_millis;
use crate::{AppError, Result};

/// A launched encoder: its group-leader pid plus the observation handles
/// the registry keeps.
#[derive(Debug)]
pub struct SpawnedEncoder {
    /// Leader pid of the new process group.
    pub pid: i32,
    /// Bumped on every output line from the encoder.
    pub last_activity: Arc<AtomicU64>,
    /// Flips true once the encoder has been reaped.
    pub exited: watch::Receiver<bool>,
}

/// One drawtext filter reading a slot file with live reload.
fn drawtext(font: &str, store: &OverlayStore, slot: OverlaySlot, pos: &str, color: &str) -> String {
    format!(
        "drawtext=fontfile='{font}':textfile='{file}':reload=1:{pos}:fontcolor={color}",
        file = store.slot_path(slot).display(),
    )
}

/// Build the full ffmpeg argument vector for one worker.
///
/// Inputs: the live stream plus the scoreboard image, three logos, and a
/// white backing strip. The filter graph scales and stacks the images,
/// then draws every overlay slot file over the composite with `reload=1`
/// so the encoder picks up slot rewrites on its own schedule.
#[must_use]
pub fn build_encoder_args(
    encoder: &EncoderConfig,
    input_url: &str,
    output_url: &str,
    store: &OverlayStore,
) -> Vec<String> {
    let font = encoder.font_path.display().to_string();
    let filter_complex = [
        "[1:v]scale=329:117[overlay];".to_owned(),
        "[2:v]scale=80:80[logo1];".to_owned(),
        "[3:v]scale=80:80[logo2];".to_owned(),
        "[4:v]scale=80:80[logo3];".to_owned(),
        "[5:v]scale=320:100[bgwhite];".to_owned(),
        "[0:v][overlay]overlay=45:30[tmp1];".to_owned(),
        "[tmp1][bgwhite]overlay=W-w-0:0[tmpb];".to_owned(),
        "[tmpb][logo1]overlay=W-w-10:10[tmp2];".to_owned(),
        "[tmp2][logo2]overlay=W-w-110:10[tmp3];".to_owned(),
        "[tmp3][logo3]overlay=W-w-220:10[vbase];".to_owned(),
        "[vbase]".to_owned(),
        drawtext(&font, store, OverlaySlot::Name, "x=70:y=42:fontsize=20", "white") + ",",
        drawtext(&font, store, OverlaySlot::PlayerName1, "x=90:y=82:fontsize=18", "white") + ",",
        drawtext(&font, store, OverlaySlot::PlayerName2, "x=90:y=120:fontsize=18", "white") + ",",
        drawtext(&font, store, OverlaySlot::P1Score, "x=290:y=82:fontsize=18", "white") + ",",
        drawtext(&font, store, OverlaySlot::P2Score, "x=290:y=120:fontsize=18", "white") + ",",
        drawtext(&font, store, OverlaySlot::NowPoint1, "x=335:y=82:fontsize=18", "black") + ",",
        drawtext(&font, store, OverlaySlot::NowPoint2, "x=335:y=120:fontsize=18", "black") + ",",
        drawtext(
            &font,
            store,
            OverlaySlot::Player1Innings,
            "x=50:y=100:fontsize=20",
            "white",
        ) + "[vout]",
    ]
    .join("");

    let mut args: Vec<String> = Vec::new();
    for input in [
        input_url,
        &encoder.image_path.display().to_string(),
        &encoder.logo1_path.display().to_string(),
        &encoder.logo2_path.display().to_string(),
        &encoder.logo3_path.display().to_string(),
        &encoder.bg_white_path.display().to_string(),
    ] {
        args.push("-i".into());
        args.push(input.to_owned());
    }
    args.extend(
        [
            "-filter_complex",
            &filter_complex,
            "-map",
            "[vout]",
            "-map",
            "0:a?",
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-c:a",
            "copy",
            "-f",
            "flv",
            output_url,
        ]
        .into_iter()
        .map(str::to_owned),
    );
    args
}

/// Launch the encoder for one device.
///
/// The process gets no interactive input and becomes the leader of a new
/// process group. Reader tasks bump `last_activity` on every stdout or
/// stderr line; an exit watcher reaps the child and flips the `exited`
/// channel, which is the authoritative exit notification for the
/// registry.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the launch itself fails (binary missing,
/// bad arguments) or no pid is available. Nothing is registered in that
/// case.
pub fn spawn_encoder(
    encoder: &EncoderConfig,
    device_id: &str,
    output_url: &str,
    store: &OverlayStore,
) -> Result<SpawnedEncoder> {
    let input_url = format!("{}{device_id}", encoder.input_stream_url);
    let args = build_encoder_args(encoder, &input_url, output_url, store);
    debug!(device_id, binary = encoder.binary, "spawning encoder");

    let mut cmd = Command::new(&encoder.binary);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn encoder: {err}")))?;

    let pid = child
        .id()
        .and_then(|raw| i32::try_from(raw).ok())
        .ok_or_else(|| AppError::Spawn("encoder spawned without a pid".into()))?;

    let last_activity = Arc::new(AtomicU64::new(now_millis()));
    if let Some(stdout) = child.stdout.take() {
        spawn_output_reader(device_id.to_owned(), stdout, Arc::clone(&last_activity));
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_output_reader(device_id.to_owned(), stderr, Arc::clone(&last_activity));
    }

    let (exit_tx, exited) = watch::channel(false);
    let watcher_device = device_id.to_owned();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => info!(device_id = watcher_device, %status, "encoder exited"),
            Err(err) => warn!(device_id = watcher_device, %err, "failed to reap encoder"),
        }
        let _ = exit_tx.send(true);
    });

    info!(device_id, pid, "encoder process spawned");
    Ok(SpawnedEncoder {
        pid,
        last_activity,
        exited,
    })
}

/// Consume one encoder output stream line by line, recording activity.
fn spawn_output_reader(
    device_id: String,
    stream: impl AsyncRead + Unpin + Send + 'static,
    last_activity: Arc<AtomicU64>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            last_activity.store(now_millis(), Ordering::Relaxed);
            trace!(device_id, line, "encoder output");
        }
    });
}
