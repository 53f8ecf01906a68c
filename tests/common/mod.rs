//! In-process stand-ins for the backend: a socket.io stream over websocket
//! and the two relay http endpoints.

#![allow(dead_code)]

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, routing::post, Json, Router};
use futures_util::{SinkExt, StreamExt};
use iot_monitor::config::ReconnectConfig;
use iot_monitor::RelayState;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const NSP: &str = "/sensors";

pub const HANDSHAKE: &str =
    r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

pub fn reading(id: u64) -> Value {
    json!({
        "id": id,
        "timestamp": format!("2024-05-01T10:00:{:02}Z", id % 60),
        "temperature": 20.0 + id as f64,
        "humidity": 55.5
    })
}

pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig { initial_delay_ms: 50, max_delay_ms: 200 }
}

// ==============================================================================
// socket.io stream
// ==============================================================================

pub struct FakeStream {
    listener: TcpListener,
}

impl FakeStream {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self { listener }
    }

    pub fn url(&self) -> String {
        let addr = self.listener.local_addr().unwrap();
        format!("ws://{}/socket.io/?EIO=4&transport=websocket", addr)
    }

    pub async fn accept(&self) -> Peer {
        let (tcp, _) = tokio::time::timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        Peer { ws }
    }

    /// accept and run the open/connect exchange up to the backlog request
    pub async fn accept_joined(&self) -> Peer {
        let mut peer = self.accept().await;
        peer.join().await;
        peer
    }

    /// accept one dial and hang up before the websocket upgrade
    pub async fn refuse(&self) {
        let (tcp, _) = tokio::time::timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        drop(tcp);
    }

    /// hang up on every dial from now on, counting them
    pub fn refuse_all(self) -> Arc<AtomicUsize> {
        let dials = Arc::new(AtomicUsize::new(0));
        let counter = dials.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = self.listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(tcp);
            }
        });
        dials
    }
}

pub struct Peer {
    ws: WebSocketStream<TcpStream>,
}

impl Peer {
    pub async fn send(&mut self, frame: &str) {
        let _ = self.ws.send(Message::Text(frame.to_string())).await;
    }

    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            let next = tokio::time::timeout(Duration::from_secs(5), self.ws.next()).await.ok()??;
            match next {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    pub async fn join(&mut self) {
        self.join_with(HANDSHAKE).await;
    }

    /// join after sending `open` as the engine.io handshake
    pub async fn join_with(&mut self, open: &str) {
        self.send(open).await;
        assert_eq!(self.recv_text().await.as_deref(), Some("40/sensors,"));
        self.send(r#"40/sensors,{"sid":"sio-1"}"#).await;
        assert_eq!(self.recv_text().await.as_deref(), Some(r#"42/sensors,["requestSensorData"]"#));
    }

    pub async fn emit(&mut self, event: &str, payload: Value) {
        self.send(&format!("42{},{}", NSP, json!([event, payload]))).await;
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

// ==============================================================================
// relay endpoints
// ==============================================================================

#[derive(Default)]
pub struct RelayServerState {
    pub current: Mutex<RelayState>,
    pub received: Mutex<Vec<RelayState>>,
    pub fail_status: Mutex<bool>,
    pub fail_update: Mutex<bool>,
}

pub struct FakeRelays {
    pub base_url: String,
    pub state: Arc<RelayServerState>,
}

impl FakeRelays {
    pub async fn start(initial: RelayState) -> Self {
        let state = Arc::new(RelayServerState::default());
        *state.current.lock().unwrap() = initial;

        let app = Router::new()
            .route("/relay/status", get(status_handler))
            .route("/relay/update", post(update_handler))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { base_url, state }
    }

    pub fn received(&self) -> Vec<RelayState> {
        self.state.received.lock().unwrap().clone()
    }
}

async fn status_handler(State(state): State<Arc<RelayServerState>>) -> axum::response::Response {
    if *state.fail_status.lock().unwrap() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "relay board offline").into_response();
    }
    let current = *state.current.lock().unwrap();
    Json(current).into_response()
}

async fn update_handler(State(state): State<Arc<RelayServerState>>, Json(body): Json<RelayState>) -> StatusCode {
    state.received.lock().unwrap().push(body);
    if *state.fail_update.lock().unwrap() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    *state.current.lock().unwrap() = body;
    StatusCode::OK
}
