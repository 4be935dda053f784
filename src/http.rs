//! HTTP command surface and device WebSocket endpoint.
//!
//! Thin routing layer over the worker registry: request validation and
//! status-code mapping live here, all semantics live in
//! [`WorkerRegistry`]. Informational outcomes ("already running",
//! "nothing running") map to 200 responses; only unknown devices on
//! update/score map to 404.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::overlay::store::OverlayFields;
use crate::overlay::sync::ScorePayload;
use crate::push::{PushMessage, PushRooms};
use crate::worker::registry::{StartRequest, WorkerRegistry};
use crate::{AppError, Result};

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    /// Worker registry driving all command semantics.
    pub registry: Arc<WorkerRegistry>,
    /// Device push-channel rooms.
    pub rooms: Arc<PushRooms>,
}

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/startlive", post(start_live))
        .route("/api/updateoverlay", post(update_overlay))
        .route("/api/stoplive", post(stop_live))
        .route("/api/hook/on_done", post(on_done_hook))
        .route("/api/status/{deviceid}", get(status))
        .route("/api/score", post(score_event))
        .route("/api/push", post(push_to_device))
        .route("/ws/{deviceid}", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve the router on the configured port until the token fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener cannot bind, or
/// `AppError::Io` if serving fails.
pub async fn serve_http(state: AppState, port: u16, cancel: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {addr}: {err}")))?;
    info!(%addr, "http surface listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("http server failed: {err}")))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct StartLiveRequest {
    deviceid: Option<String>,
    url: Option<String>,
    streamkey: Option<String>,
    #[serde(flatten)]
    overlay: OverlayFields,
}

async fn start_live(
    State(state): State<AppState>,
    Json(req): Json<StartLiveRequest>,
) -> (StatusCode, Json<Value>) {
    let (Some(deviceid), Some(url), Some(streamkey)) = (req.deviceid, req.url, req.streamkey)
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing deviceid/url/streamkey" })),
        );
    };

    let outcome = state
        .registry
        .start(StartRequest {
            device_id: deviceid,
            output_url: url,
            stream_key: streamkey,
            overlay_init: req.overlay,
        })
        .await;

    match outcome {
        Ok(outcome) if outcome.created => (
            StatusCode::OK,
            Json(json!({
                "created": true,
                "deviceid": outcome.device_id,
                "pid": outcome.pid,
            })),
        ),
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "created": false,
                "deviceid": outcome.device_id,
                "message": "worker already running",
            })),
        ),
        Err(AppError::Validation(msg)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": msg })))
        }
        Err(err) => {
            warn!(%err, "start live failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpdateOverlayRequest {
    deviceid: Option<String>,
    #[serde(flatten)]
    fields: OverlayFields,
}

async fn update_overlay(
    State(state): State<AppState>,
    Json(req): Json<UpdateOverlayRequest>,
) -> (StatusCode, Json<Value>) {
    let Some(deviceid) = req.deviceid else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing deviceid" })),
        );
    };
    if state.registry.update_overlay(&deviceid, &req.fields).await {
        (StatusCode::OK, Json(json!({ "message": "overlay updated" })))
    } else {
        let err = AppError::NotFound(format!("no worker for device {deviceid}"));
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": err.to_string() })),
        )
    }
}

#[derive(Debug, Deserialize)]
struct StopLiveRequest {
    deviceid: Option<String>,
}

async fn stop_live(
    State(state): State<AppState>,
    Json(req): Json<StopLiveRequest>,
) -> (StatusCode, Json<Value>) {
    let Some(deviceid) = req.deviceid else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing deviceid" })),
        );
    };
    let outcome = state.registry.stop(&deviceid).await;
    let message = if outcome.stopped {
        "worker stopped"
    } else {
        "no worker running for this deviceid"
    };
    (
        StatusCode::OK,
        Json(json!({ "stopped": outcome.stopped, "message": message })),
    )
}

/// The external transcoder's completion webhook delivers the device id
/// under the `name` field.
#[derive(Debug, Deserialize)]
struct DoneHookRequest {
    name: Option<String>,
}

async fn on_done_hook(
    State(state): State<AppState>,
    Json(req): Json<DoneHookRequest>,
) -> StatusCode {
    if let Some(deviceid) = req.name {
        // Best-effort kill; the hook never surfaces an error.
        let registry = Arc::clone(&state.registry);
        tokio::spawn(async move {
            if !registry.kill_worker(&deviceid, "on_done").await {
                debug!(deviceid, "done hook for unknown device");
            }
        });
    }
    StatusCode::OK
}

async fn status(
    State(state): State<AppState>,
    Path(deviceid): Path<String>,
) -> Json<Value> {
    let running = state.registry.is_active(&deviceid).await;
    Json(json!({ "running": running }))
}

#[derive(Debug, Deserialize)]
struct ScoreEventRequest {
    deviceid: Option<String>,
    #[serde(rename = "scoreData")]
    score_data: Option<ScorePayload>,
}

async fn score_event(
    State(state): State<AppState>,
    Json(req): Json<ScoreEventRequest>,
) -> (StatusCode, Json<Value>) {
    let (Some(deviceid), Some(payload)) = (req.deviceid, req.score_data) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing deviceid/scoreData" })),
        );
    };
    if state.registry.score_event(&deviceid, payload).await {
        (StatusCode::OK, Json(json!({ "message": "score queued" })))
    } else {
        let err = AppError::NotFound(format!("no worker for device {deviceid}"));
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": err.to_string() })),
        )
    }
}

#[derive(Debug, Deserialize)]
struct PushRequest {
    deviceid: Option<String>,
    status: Option<String>,
    action: Option<String>,
}

async fn push_to_device(
    State(state): State<AppState>,
    Json(req): Json<PushRequest>,
) -> (StatusCode, Json<Value>) {
    let (Some(deviceid), Some(action)) = (req.deviceid, req.action) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing deviceid/action" })),
        );
    };
    let message = PushMessage {
        status: req.status.unwrap_or_else(|| "message".into()),
        action,
        device_id: deviceid.clone(),
    };
    let delivered = state.rooms.send_to_device(&deviceid, &message);
    (StatusCode::OK, Json(json!({ "delivered": delivered })))
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Path(deviceid): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if deviceid.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing deviceId").into_response();
    }
    ws.on_upgrade(move |socket| device_socket(socket, deviceid, state.rooms))
}

/// Serve one device connection: greet, forward queued pushes, log
/// inbound frames, unregister on close.
async fn device_socket(socket: WebSocket, deviceid: String, rooms: Arc<PushRooms>) {
    let (mut sink, mut stream) = socket.split();
    let (connection_id, mut outbound) = rooms.join(&deviceid);
    info!(deviceid, connection_id, "device connected");

    let greeting = json!({
        "status": "message",
        "action": "connected",
        "deviceId": deviceid,
    })
    .to_string();
    if sink.send(Message::Text(greeting.into())).await.is_err() {
        rooms.leave(&deviceid, connection_id);
        return;
    }

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(text) = queued else { break };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        debug!(deviceid, %text, "device message");
                    }
                    None | Some(Err(_) | Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    rooms.leave(&deviceid, connection_id);
    info!(deviceid, connection_id, "device disconnected");
}
