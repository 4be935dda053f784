//! Device push channel.
//!
//! Remote capture devices hold a WebSocket open against
//! `/ws/{deviceId}`; the daemon addresses them by device id with
//! fire-and-forget JSON messages (remote start/stop commands on the
//! producer-side workflow). Delivery is best-effort: an offline device
//! simply misses the message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A command pushed to a device.
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    /// Message class, e.g. `"message"`.
    pub status: String,
    /// Command for the device, e.g. `"start"` or `"stop"`.
    pub action: String,
    /// Addressed device.
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

/// One device's set of open connections, keyed by connection id.
type Room = HashMap<u64, mpsc::UnboundedSender<String>>;

/// Connection rooms keyed by device id.
#[derive(Debug, Default)]
pub struct PushRooms {
    rooms: Mutex<HashMap<String, Room>>,
    next_id: AtomicU64,
}

impl PushRooms {
    /// Create an empty room set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a message to every connection of one device.
    ///
    /// Returns `false` when the device has no open connection; the
    /// message is dropped in that case.
    pub fn send_to_device(&self, device_id: &str, message: &PushMessage) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                debug!(device_id, %err, "failed to encode push message");
                return false;
            }
        };
        let rooms = self
            .rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(room) = rooms.get(device_id).filter(|room| !room.is_empty()) else {
            debug!(device_id, "push dropped, device offline");
            return false;
        };
        info!(device_id, %text, "push to device");
        for sender in room.values() {
            // A send failure means the connection task is already gone;
            // its cleanup removes the entry.
            let _ = sender.send(text.clone());
        }
        true
    }

    /// Whether the device currently has at least one open connection.
    #[must_use]
    pub fn connected(&self, device_id: &str) -> bool {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .is_some_and(|room| !room.is_empty())
    }

    /// Register a new connection for a device, returning its id and the
    /// receiver the connection task forwards from.
    pub fn join(&self, device_id: &str) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(device_id.to_owned())
            .or_default()
            .insert(id, tx);
        (id, rx)
    }

    /// Unregister a connection; drops the room once it empties.
    pub fn leave(&self, device_id: &str, id: u64) {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(room) = rooms.get_mut(device_id) {
            room.remove(&id);
            if room.is_empty() {
                rooms.remove(device_id);
            }
        }
    }
}
