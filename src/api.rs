//! ==============================================================================
//! api.rs - local json bridge for the presentation layer
//! ==============================================================================
//!
//! purpose:
//!     the charts and switches live in another process. this serves them
//!     read-only snapshots and accepts toggle intents; nothing here mutates
//!     the store, and relay changes go through the coordinator only.
//!
//! routes:
//!     GET  /api/telemetry               latest reading, window, stream status
//!     GET  /api/relays                  one view per relay
//!     POST /api/relays/:relay/toggle    optimistic flip, 202 + new view
//!
//! ==============================================================================

use crate::channel::ChannelStatus;
use crate::domain::{RelayId, SensorReading};
use crate::relay::{RelayCoordinator, RelayView};
use crate::store::TelemetryStore;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<TelemetryStore>,
    pub relays: RelayCoordinator,
    pub stream: Option<watch::Receiver<ChannelStatus>>,
}

#[derive(Serialize)]
struct TelemetryResponse {
    latest: Option<SensorReading>,
    window: Vec<SensorReading>,
    stream: Option<ChannelStatus>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/telemetry", get(telemetry_handler))
        .route("/api/relays", get(relays_handler))
        .route("/api/relays/:relay/toggle", post(toggle_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the bridge until the listener fails
pub async fn serve(listener: tokio::net::TcpListener, state: ApiState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn telemetry_handler(State(state): State<ApiState>) -> Json<TelemetryResponse> {
    let snapshot = state.store.snapshot();
    Json(TelemetryResponse {
        latest: snapshot.latest,
        window: snapshot.window,
        stream: state.stream.as_ref().map(|rx| *rx.borrow()),
    })
}

async fn relays_handler(State(state): State<ApiState>) -> Json<Vec<RelayView>> {
    Json(state.relays.views())
}

async fn toggle_handler(State(state): State<ApiState>, Path(relay): Path<String>) -> Response {
    let id: RelayId = match relay.parse() {
        Ok(id) => id,
        Err(message) => {
            return (StatusCode::NOT_FOUND, Json(serde_json::json!({"status": "error", "message": message})))
                .into_response()
        }
    };

    // the write keeps running after the handle is dropped
    let _write = state.relays.toggle(id);

    match state.relays.views().into_iter().find(|v| v.id == id) {
        Some(view) => (StatusCode::ACCEPTED, Json(view)).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
