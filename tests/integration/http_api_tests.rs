//! Integration tests for the HTTP command surface, served on an
//! ephemeral port and driven with a real client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use streamvisor::http::{self, AppState};
use streamvisor::overlay::store::{OverlaySlot, OverlayStore};
use streamvisor::push::PushRooms;
use streamvisor::worker::registry::WorkerRegistry;

use super::test_helpers::{eventually, sleeper_encoder, test_registry};

/// Serve the router on an ephemeral port; returns the base URL and the
/// registry behind it.
async fn spawn_app(overlay_dir: &Path, binary: &Path) -> (String, Arc<WorkerRegistry>) {
    let registry = test_registry(overlay_dir, binary);
    let state = AppState {
        registry: Arc::clone(&registry),
        rooms: Arc::new(PushRooms::new()),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, http::router(state)).await;
    });
    (format!("http://{addr}"), registry)
}

fn start_body(deviceid: &str) -> Value {
    json!({
        "deviceid": deviceid,
        "url": "rtmps://sink.example/live",
        "streamkey": "key-1",
    })
}

// ── Health ───────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, _registry) = spawn_app(tmp.path(), &binary).await;

    let resp = reqwest::get(format!("{base}/health")).await.expect("get");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("body"), "ok");
}

// ── Start / status / stop ────────────────────────────────────

#[tokio::test]
async fn start_status_stop_roundtrip() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, _registry) = spawn_app(tmp.path(), &binary).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/startlive"))
        .json(&start_body("cam-1"))
        .send()
        .await
        .expect("startlive");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["created"], true);
    assert_eq!(body["deviceid"], "cam-1");
    assert!(body["pid"].as_i64().is_some_and(|pid| pid > 0));

    let status: Value = client
        .get(format!("{base}/api/status/cam-1"))
        .send()
        .await
        .expect("status")
        .json()
        .await
        .expect("json");
    assert_eq!(status["running"], true);

    let resp = client
        .post(format!("{base}/api/stoplive"))
        .json(&json!({ "deviceid": "cam-1" }))
        .send()
        .await
        .expect("stoplive");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["stopped"], true);

    let status: Value = client
        .get(format!("{base}/api/status/cam-1"))
        .send()
        .await
        .expect("status")
        .json()
        .await
        .expect("json");
    assert_eq!(status["running"], false);
}

#[tokio::test]
async fn startlive_rejects_missing_parameters() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, registry) = spawn_app(tmp.path(), &binary).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/startlive"))
        .json(&json!({ "deviceid": "cam-1" }))
        .send()
        .await
        .expect("startlive");
    assert_eq!(resp.status(), 400);
    assert!(!registry.is_active("cam-1").await);
}

#[tokio::test]
async fn second_startlive_reports_the_existing_worker() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, registry) = spawn_app(tmp.path(), &binary).await;
    let client = reqwest::Client::new();

    for expected_created in [true, false] {
        let body: Value = client
            .post(format!("{base}/api/startlive"))
            .json(&start_body("cam-1"))
            .send()
            .await
            .expect("startlive")
            .json()
            .await
            .expect("json");
        assert_eq!(body["created"], expected_created);
    }
    assert_eq!(registry.count_active().await, 1);

    registry.stop("cam-1").await;
}

#[tokio::test]
async fn stoplive_for_unknown_device_is_informational() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, _registry) = spawn_app(tmp.path(), &binary).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/stoplive"))
        .json(&json!({ "deviceid": "cam-ghost" }))
        .send()
        .await
        .expect("stoplive");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["stopped"], false);
}

// ── Overlay updates ──────────────────────────────────────────

#[tokio::test]
async fn updateoverlay_writes_the_slot_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, registry) = spawn_app(tmp.path(), &binary).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/api/startlive"))
        .json(&start_body("cam-1"))
        .send()
        .await
        .expect("startlive");

    let resp = client
        .post(format!("{base}/api/updateoverlay"))
        .json(&json!({ "deviceid": "cam-1", "p1Score": 7, "playerName1": "Alice" }))
        .send()
        .await
        .expect("updateoverlay");
    assert_eq!(resp.status(), 200);

    let store = OverlayStore::new("cam-1", tmp.path());
    assert_eq!(
        std::fs::read_to_string(store.slot_path(OverlaySlot::P1Score)).expect("read"),
        "7"
    );
    assert_eq!(
        std::fs::read_to_string(store.slot_path(OverlaySlot::PlayerName1)).expect("read"),
        "Alice"
    );

    registry.stop("cam-1").await;
}

#[tokio::test]
async fn updateoverlay_for_unknown_device_is_not_found() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, _registry) = spawn_app(tmp.path(), &binary).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/updateoverlay"))
        .json(&json!({ "deviceid": "cam-ghost", "p1Score": 7 }))
        .send()
        .await
        .expect("updateoverlay");
    assert_eq!(resp.status(), 404);
}

// ── Score events ─────────────────────────────────────────────

#[tokio::test]
async fn score_event_lands_on_the_overlay_after_the_debounce() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, registry) = spawn_app(tmp.path(), &binary).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/api/startlive"))
        .json(&start_body("cam-1"))
        .send()
        .await
        .expect("startlive");

    let resp = client
        .post(format!("{base}/api/score"))
        .json(&json!({
            "deviceid": "cam-1",
            "scoreData": { "player1Score": 7, "player1Name": "Alice Smith" },
        }))
        .send()
        .await
        .expect("score");
    assert_eq!(resp.status(), 200);

    let store = OverlayStore::new("cam-1", tmp.path());
    assert!(
        eventually(Duration::from_secs(2), || async {
            std::fs::read_to_string(store.slot_path(OverlaySlot::P1Score))
                .is_ok_and(|s| s == " 7")
        })
        .await,
        "score write should land after the debounce window"
    );

    registry.stop("cam-1").await;
}

#[tokio::test]
async fn score_event_for_unknown_device_is_not_found() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, _registry) = spawn_app(tmp.path(), &binary).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/score"))
        .json(&json!({ "deviceid": "cam-ghost", "scoreData": {} }))
        .send()
        .await
        .expect("score");
    assert_eq!(resp.status(), 404);
}

// ── Completion hook ──────────────────────────────────────────

#[tokio::test]
async fn done_hook_tears_the_worker_down() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, registry) = spawn_app(tmp.path(), &binary).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/api/startlive"))
        .json(&start_body("cam-1"))
        .send()
        .await
        .expect("startlive");

    let resp = client
        .post(format!("{base}/api/hook/on_done"))
        .json(&json!({ "name": "cam-1" }))
        .send()
        .await
        .expect("hook");
    assert_eq!(resp.status(), 200);

    let registry_ref = &registry;
    assert!(
        eventually(Duration::from_secs(5), || async {
            !registry_ref.is_active("cam-1").await
        })
        .await,
        "worker should be gone after the completion hook"
    );
}

#[tokio::test]
async fn done_hook_for_unknown_device_is_still_acknowledged() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, _registry) = spawn_app(tmp.path(), &binary).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/hook/on_done"))
        .json(&json!({ "name": "cam-ghost" }))
        .send()
        .await
        .expect("hook");
    assert_eq!(resp.status(), 200);
}

// ── Push channel ─────────────────────────────────────────────

#[tokio::test]
async fn push_to_offline_device_reports_undelivered() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, _registry) = spawn_app(tmp.path(), &binary).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/push"))
        .json(&json!({ "deviceid": "cam-ghost", "action": "start" }))
        .send()
        .await
        .expect("push");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["delivered"], false);
}

#[tokio::test]
async fn push_without_an_action_is_rejected() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let binary = sleeper_encoder(tmp.path());
    let (base, _registry) = spawn_app(tmp.path(), &binary).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/push"))
        .json(&json!({ "deviceid": "cam-1" }))
        .send()
        .await
        .expect("push");
    assert_eq!(resp.status(), 400);
}
