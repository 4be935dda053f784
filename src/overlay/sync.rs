//! Per-device score-event synchronizer.
//!
//! Each active worker gets one sync task that consumes its score-event
//! stream, normalizes every payload into a [`ScoreSnapshot`], drops
//! no-change events, and coalesces bursts through a debounce window so
//! only the most recent snapshot of a burst is ever written to the
//! overlay store.
//!
//! Events are delivered via a `tokio::sync::mpsc` channel; the task stops
//! when its `CancellationToken` fires or the channel closes.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::store::{stringify, OverlaySlot, OverlayStore};

/// Display name used when a player name is missing or blank.
const FALLBACK_PLAYER: &str = "Player";

/// Title used when the arena name is missing or the literal `"null"`.
const FALLBACK_NAME: &str = "Arena";

/// Display names longer than this many words are trimmed to their tail.
const MAX_NAME_WORDS: usize = 3;

/// Raw score payload as it arrives from the feed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScorePayload {
    /// Arena / match title.
    pub name: Option<Value>,
    /// First player's full name.
    pub player1_name: Option<Value>,
    /// Second player's full name.
    pub player2_name: Option<Value>,
    /// First player's running score.
    pub player1_score: Option<Value>,
    /// Second player's running score.
    pub player2_score: Option<Value>,
    /// First player's current-rack points.
    pub now_point1: Option<Value>,
    /// Second player's current-rack points.
    pub now_point2: Option<Value>,
    /// First player's innings count.
    pub player1_innings: Option<Value>,
}

/// Normalized, display-ready overlay values for one score event.
///
/// Compared by value against the last applied snapshot to decide whether
/// a write is needed at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreSnapshot {
    /// Arena / match title line.
    pub name: String,
    /// First player's trimmed display name.
    pub player_name1: String,
    /// Second player's trimmed display name.
    pub player_name2: String,
    /// First player's padded score.
    pub p1_score: String,
    /// Second player's padded score.
    pub p2_score: String,
    /// First player's padded current-rack points.
    pub now_point1: String,
    /// Second player's padded current-rack points.
    pub now_point2: String,
    /// First player's padded innings count.
    pub player1_innings: String,
}

impl ScoreSnapshot {
    /// Normalize a raw payload into display-ready values.
    #[must_use]
    pub fn normalize(payload: &ScorePayload) -> Self {
        Self {
            name: normalize_title(payload.name.as_ref()),
            player_name1: trim_display_name(payload.player1_name.as_ref()),
            player_name2: trim_display_name(payload.player2_name.as_ref()),
            p1_score: pad_numeric(payload.player1_score.as_ref()),
            p2_score: pad_numeric(payload.player2_score.as_ref()),
            now_point1: pad_numeric(payload.now_point1.as_ref()),
            now_point2: pad_numeric(payload.now_point2.as_ref()),
            player1_innings: pad_numeric(payload.player1_innings.as_ref()),
        }
    }

    /// Write every slot from this snapshot into the store.
    ///
    /// Absent feed fields were already mapped to their normalized
    /// fallbacks, so a full write never resurrects stale values.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if any slot write fails.
    pub fn write_to(&self, store: &OverlayStore) -> crate::Result<()> {
        store.write(OverlaySlot::Name, &self.name)?;
        store.write(OverlaySlot::PlayerName1, &self.player_name1)?;
        store.write(OverlaySlot::PlayerName2, &self.player_name2)?;
        store.write(OverlaySlot::P1Score, &self.p1_score)?;
        store.write(OverlaySlot::P2Score, &self.p2_score)?;
        store.write(OverlaySlot::NowPoint1, &self.now_point1)?;
        store.write(OverlaySlot::NowPoint2, &self.now_point2)?;
        store.write(OverlaySlot::Player1Innings, &self.player1_innings)?;
        Ok(())
    }
}

/// Stringify a numeric field, defaulting to `"0"`, left-padded with one
/// space when two characters or fewer so short values line up on the
/// rendered scoreboard.
#[must_use]
pub fn pad_numeric(value: Option<&Value>) -> String {
    let s = value.map_or_else(|| "0".to_owned(), |v| {
        if v.is_null() {
            "0".to_owned()
        } else {
            stringify(v)
        }
    });
    if s.chars().count() <= 2 {
        format!(" {s}")
    } else {
        s
    }
}

/// Trim a player name to its last words so long names fit the overlay.
/// Missing or blank names fall back to a neutral label.
#[must_use]
pub fn trim_display_name(value: Option<&Value>) -> String {
    let raw = value.map(stringify).unwrap_or_default();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return FALLBACK_PLAYER.to_owned();
    }
    let words: Vec<&str> = trimmed.split_whitespace().collect();
    if words.len() > MAX_NAME_WORDS {
        words[words.len() - MAX_NAME_WORDS..].join(" ")
    } else {
        trimmed.to_owned()
    }
}

/// Normalize the arena title; the feed sends the literal string `"null"`
/// for unset titles.
#[must_use]
pub fn normalize_title(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => FALLBACK_NAME.to_owned(),
        Some(v) => {
            let s = stringify(v);
            if s == "null" {
                FALLBACK_NAME.to_owned()
            } else {
                s
            }
        }
    }
}

/// Builder for one device's synchronizer task.
pub struct OverlaySync {
    store: OverlayStore,
    debounce: Duration,
    cancel: CancellationToken,
}

impl OverlaySync {
    /// Construct a synchronizer (does not start the task yet).
    #[must_use]
    pub fn new(store: OverlayStore, debounce: Duration, cancel: CancellationToken) -> Self {
        Self {
            store,
            debounce,
            cancel,
        }
    }

    /// Spawn the background task and return the handle used to feed it.
    #[must_use]
    pub fn spawn(self) -> SyncHandle {
        let (tx, rx) = mpsc::channel(64);
        let cancel = self.cancel.clone();
        tokio::spawn(Self::run(self.store, self.debounce, rx, self.cancel));
        SyncHandle { tx, cancel }
    }

    async fn run(
        store: OverlayStore,
        debounce: Duration,
        mut rx: mpsc::Receiver<ScorePayload>,
        cancel: CancellationToken,
    ) {
        let device_id = store.device_id().to_owned();
        let mut last_applied: Option<ScoreSnapshot> = None;
        // At most one pending write; each newer event replaces it and the
        // debounce timer restarts from the latest arrival.
        let mut pending: Option<ScoreSnapshot> = None;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(device_id, "overlay sync cancelled");
                    return;
                }
                event = rx.recv() => {
                    let Some(payload) = event else {
                        debug!(device_id, "score channel closed");
                        return;
                    };
                    let snapshot = ScoreSnapshot::normalize(&payload);
                    if last_applied.as_ref() == Some(&snapshot) && pending.is_none() {
                        debug!(device_id, "score unchanged, skipping write");
                        continue;
                    }
                    pending = Some(snapshot);
                }
                () = tokio::time::sleep(debounce), if pending.is_some() => {
                    if let Some(snapshot) = pending.take() {
                        // A burst may settle back on the already-applied
                        // value; suppress the redundant write.
                        if last_applied.as_ref() == Some(&snapshot) {
                            continue;
                        }
                        match snapshot.write_to(&store) {
                            Ok(()) => {
                                debug!(device_id, "overlay updated");
                                last_applied = Some(snapshot);
                            }
                            Err(err) => {
                                warn!(device_id, %err, "overlay write failed");
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Handle for one device's synchronizer task.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<ScorePayload>,
    cancel: CancellationToken,
}

impl SyncHandle {
    /// Queue a score event for the device. Returns `false` when the task
    /// has stopped or its queue is full; score events are droppable, so
    /// the caller never blocks.
    pub fn send(&self, payload: ScorePayload) -> bool {
        self.tx.try_send(payload).is_ok()
    }

    /// Stop the task, discarding any pending debounced write.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
