//! Per-device overlay slot files.
//!
//! One plain-text file per slot, named `<deviceId>_<slot>.txt` under a
//! shared scratch directory, rewritten in place on each change. The files
//! are created when a worker starts and unlinked when it terminates; the
//! encoder polls them on its own schedule, so writes carry no framing.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::{AppError, Result};

/// The fixed set of overlay fields rendered by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlaySlot {
    /// Arena / match title line.
    Name,
    /// First player's display name.
    PlayerName1,
    /// Second player's display name.
    PlayerName2,
    /// First player's running score.
    P1Score,
    /// Second player's running score.
    P2Score,
    /// First player's current-rack points.
    NowPoint1,
    /// Second player's current-rack points.
    NowPoint2,
    /// First player's innings count.
    Player1Innings,
}

impl OverlaySlot {
    /// Every slot, in the order the encoder's filter graph references them.
    pub const ALL: [Self; 8] = [
        Self::Name,
        Self::PlayerName1,
        Self::PlayerName2,
        Self::P1Score,
        Self::P2Score,
        Self::NowPoint1,
        Self::NowPoint2,
        Self::Player1Innings,
    ];

    /// Stable key used in file names and request fields.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::PlayerName1 => "playerName1",
            Self::PlayerName2 => "playerName2",
            Self::P1Score => "p1Score",
            Self::P2Score => "p2Score",
            Self::NowPoint1 => "nowPoint1",
            Self::NowPoint2 => "nowPoint2",
            Self::Player1Innings => "player1Innings",
        }
    }

    /// Value written at worker start when no initial field was supplied.
    #[must_use]
    pub fn initial_value(self) -> &'static str {
        match self {
            Self::Name | Self::PlayerName1 | Self::PlayerName2 => "",
            _ => "0",
        }
    }
}

/// Any subset of overlay fields, as supplied by start/update requests.
///
/// Values arrive as raw JSON so both `{"p1Score": 7}` and
/// `{"p1Score": "7"}` are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayFields {
    /// Arena / match title.
    pub name: Option<Value>,
    /// First player's display name.
    pub player_name1: Option<Value>,
    /// Second player's display name.
    pub player_name2: Option<Value>,
    /// First player's running score.
    pub p1_score: Option<Value>,
    /// Second player's running score.
    pub p2_score: Option<Value>,
    /// First player's current-rack points.
    pub now_point1: Option<Value>,
    /// Second player's current-rack points.
    pub now_point2: Option<Value>,
    /// First player's innings count.
    pub player1_innings: Option<Value>,
}

impl OverlayFields {
    /// The supplied value for one slot, if any.
    #[must_use]
    pub fn get(&self, slot: OverlaySlot) -> Option<&Value> {
        match slot {
            OverlaySlot::Name => self.name.as_ref(),
            OverlaySlot::PlayerName1 => self.player_name1.as_ref(),
            OverlaySlot::PlayerName2 => self.player_name2.as_ref(),
            OverlaySlot::P1Score => self.p1_score.as_ref(),
            OverlaySlot::P2Score => self.p2_score.as_ref(),
            OverlaySlot::NowPoint1 => self.now_point1.as_ref(),
            OverlaySlot::NowPoint2 => self.now_point2.as_ref(),
            OverlaySlot::Player1Innings => self.player1_innings.as_ref(),
        }
    }
}

/// Render a JSON value the way it should appear on the overlay: strings
/// verbatim, numbers stringified, null as empty.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The set of slot files backing one worker's overlay.
#[derive(Debug, Clone)]
pub struct OverlayStore {
    device_id: String,
    dir: PathBuf,
}

impl OverlayStore {
    /// Bind a store for one device under the given scratch directory.
    /// No files are touched until [`create`](Self::create).
    #[must_use]
    pub fn new(device_id: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            device_id: device_id.into(),
            dir: dir.into(),
        }
    }

    /// Device this store belongs to.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Path of one slot's backing file.
    #[must_use]
    pub fn slot_path(&self, slot: OverlaySlot) -> PathBuf {
        self.dir
            .join(format!("{}_{}.txt", self.device_id, slot.key()))
    }

    /// Create all slot files, seeding each from `initial` where supplied
    /// and from the slot's built-in default otherwise.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if any slot file cannot be written.
    pub fn create(&self, initial: &OverlayFields) -> Result<()> {
        for slot in OverlaySlot::ALL {
            let value = initial
                .get(slot)
                .map_or_else(|| slot.initial_value().to_owned(), stringify);
            self.write(slot, &value)?;
        }
        Ok(())
    }

    /// Rewrite one slot file in place.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn write(&self, slot: OverlaySlot, value: &str) -> Result<()> {
        let path = self.slot_path(slot);
        std::fs::write(&path, value).map_err(|err| {
            AppError::Io(format!("overlay write {} failed: {err}", path.display()))
        })
    }

    /// Write only the fields present in `fields`, leaving others untouched.
    /// Returns the number of slots written.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if any write fails.
    pub fn apply(&self, fields: &OverlayFields) -> Result<usize> {
        let mut written = 0;
        for slot in OverlaySlot::ALL {
            if let Some(value) = fields.get(slot) {
                self.write(slot, &stringify(value))?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Unlink all slot files. Best-effort: missing files are ignored and
    /// unlink failures only logged, since removal runs on every teardown
    /// path including ones where the files may already be gone.
    pub fn remove(&self) {
        for slot in OverlaySlot::ALL {
            let path = self.slot_path(slot);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "failed to remove overlay file");
                }
            }
        }
    }

    /// Whether any slot file currently exists on disk.
    #[must_use]
    pub fn any_exists(&self) -> bool {
        OverlaySlot::ALL
            .iter()
            .any(|slot| self.slot_path(*slot).exists())
    }

    /// The scratch directory the slot files live under.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
