//! Unit tests for the per-device overlay slot files.

use serde_json::json;
use streamvisor::overlay::store::{stringify, OverlayFields, OverlaySlot, OverlayStore};

fn read_slot(store: &OverlayStore, slot: OverlaySlot) -> String {
    std::fs::read_to_string(store.slot_path(slot)).expect("read slot file")
}

// ── Naming ───────────────────────────────────────────────────

#[test]
fn slot_paths_follow_device_and_key() {
    let store = OverlayStore::new("cam-1", "/tmp");
    assert_eq!(
        store.slot_path(OverlaySlot::P1Score).to_string_lossy(),
        "/tmp/cam-1_p1Score.txt"
    );
    assert_eq!(
        store.slot_path(OverlaySlot::PlayerName2).to_string_lossy(),
        "/tmp/cam-1_playerName2.txt"
    );
}

#[test]
fn slot_keys_are_stable() {
    assert_eq!(
        OverlaySlot::ALL.map(OverlaySlot::key),
        [
            "name",
            "playerName1",
            "playerName2",
            "p1Score",
            "p2Score",
            "nowPoint1",
            "nowPoint2",
            "player1Innings",
        ]
    );
}

// ── Value rendering ──────────────────────────────────────────

#[test]
fn stringify_renders_display_values() {
    assert_eq!(stringify(&json!("Alice")), "Alice");
    assert_eq!(stringify(&json!(7)), "7");
    assert_eq!(stringify(&json!(null)), "");
}

// ── create ───────────────────────────────────────────────────

#[test]
fn create_seeds_all_slots_with_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = OverlayStore::new("cam-1", dir.path());

    store.create(&OverlayFields::default()).expect("create");

    assert_eq!(read_slot(&store, OverlaySlot::Name), "");
    assert_eq!(read_slot(&store, OverlaySlot::PlayerName1), "");
    assert_eq!(read_slot(&store, OverlaySlot::P1Score), "0");
    assert_eq!(read_slot(&store, OverlaySlot::Player1Innings), "0");
    assert!(store.any_exists());
}

#[test]
fn create_honors_initial_fields() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = OverlayStore::new("cam-1", dir.path());

    let initial = OverlayFields {
        name: Some(json!("City Open")),
        p1_score: Some(json!(12)),
        ..OverlayFields::default()
    };
    store.create(&initial).expect("create");

    assert_eq!(read_slot(&store, OverlaySlot::Name), "City Open");
    assert_eq!(read_slot(&store, OverlaySlot::P1Score), "12");
    // Unspecified slots still get their defaults.
    assert_eq!(read_slot(&store, OverlaySlot::P2Score), "0");
}

// ── apply ────────────────────────────────────────────────────

#[test]
fn apply_writes_only_supplied_slots() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = OverlayStore::new("cam-1", dir.path());
    store.create(&OverlayFields::default()).expect("create");
    store.write(OverlaySlot::PlayerName1, "Alice").expect("seed");

    let fields = OverlayFields {
        p1_score: Some(json!("7")),
        ..OverlayFields::default()
    };
    let written = store.apply(&fields).expect("apply");

    assert_eq!(written, 1);
    assert_eq!(read_slot(&store, OverlaySlot::P1Score), "7");
    assert_eq!(read_slot(&store, OverlaySlot::PlayerName1), "Alice");
}

// ── remove ───────────────────────────────────────────────────

#[test]
fn remove_unlinks_every_slot_and_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = OverlayStore::new("cam-1", dir.path());
    store.create(&OverlayFields::default()).expect("create");
    assert!(store.any_exists());

    store.remove();
    assert!(!store.any_exists());

    // Second removal of already-missing files is a no-op.
    store.remove();
    assert!(!store.any_exists());
}

#[test]
fn stores_for_different_devices_do_not_collide() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = OverlayStore::new("cam-a", dir.path());
    let b = OverlayStore::new("cam-b", dir.path());
    a.create(&OverlayFields::default()).expect("create a");
    b.create(&OverlayFields::default()).expect("create b");

    a.remove();
    assert!(!a.any_exists());
    assert!(b.any_exists());
}
