//! Overlay slot storage and score-event synchronization.
//!
//! Each worker owns a fixed set of named text files (the "slots") that its
//! encoder re-reads on every frame. The store manages the files; the sync
//! task keeps them matched to the latest score event per device.

pub mod store;
pub mod sync;
