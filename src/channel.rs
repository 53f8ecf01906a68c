//! ==============================================================================
//! channel.rs - live telemetry channel
//! ==============================================================================
//!
//! purpose:
//!     owns the one websocket connection to the backend's sensor stream and
//!     turns whatever arrives into chronological `Vec<SensorReading>` batches
//!     for a single registered handler.
//!
//! lifecycle:
//!
//! ```text
//!     connect() ──▶ supervisor task ──▶ connection ──▶ namespace connect ack
//!                         ▲                                  │
//!                         │ backoff                          ▼
//!                    disconnected ◀── error/close ◀── requestSensorData,
//!                                                     then batches flow
//!
//!     - the backlog is requested again after every successful (re)connect.
//!     - a disconnect only logs; whatever the store holds stays visible.
//!     - malformed frames and payloads are logged and dropped.
//!     - dropping / unsubscribing the `Subscription` detaches the handler
//!       before returning and aborts the connection task.
//! ```
//!
//! relationships:
//!     - uses: protocol.rs (socket.io framing, payload normalization)
//!     - configured by: config.rs (stream url, namespace, backoff)
//!     - feeds: store.rs (via the handler monitor.rs installs)
//!
//! ==============================================================================

use crate::config::{MonitorConfig, ReconnectConfig};
use crate::domain::SensorReading;
use crate::error::{MonitorError, Result};
use crate::protocol::{self, EnginePacket, SocketPacket, TelemetryEvent};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// how long the server gets to send its engine.io open packet
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type BatchHandler = Box<dyn FnMut(Vec<SensorReading>) + Send>;
type SharedHandler = Arc<Mutex<Option<BatchHandler>>>;

/// connection state, observable through `Subscription::status`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Connecting,
    /// namespace joined and backlog requested
    Connected,
    Disconnected,
}

#[derive(Clone, Debug)]
pub struct TelemetryChannel {
    url: String,
    namespace: String,
    reconnect: ReconnectConfig,
}

impl TelemetryChannel {
    pub fn new(url: impl Into<String>, namespace: impl Into<String>, reconnect: ReconnectConfig) -> Self {
        Self { url: url.into(), namespace: namespace.into(), reconnect }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.stream_url(), config.telemetry.stream_namespace.clone(), config.reconnect.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start streaming into `on_message`.
    ///
    /// must be called from inside a tokio runtime. the connection lives
    /// exactly as long as the returned subscription.
    pub fn connect<F>(&self, on_message: F) -> Subscription
    where
        F: FnMut(Vec<SensorReading>) + Send + 'static,
    {
        let handler: SharedHandler = Arc::new(Mutex::new(Some(Box::new(on_message))));
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Connecting);
        let connections = Arc::new(AtomicU64::new(0));

        let supervisor = Supervisor {
            channel: self.clone(),
            handler: handler.clone(),
            status: status_tx,
            connections: connections.clone(),
        };
        let task = tokio::spawn(supervisor.run());

        Subscription { handler, task: Some(task), status: status_rx, connections }
    }
}

/// Owned handle on a running channel
pub struct Subscription {
    handler: SharedHandler,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<ChannelStatus>,
    connections: Arc<AtomicU64>,
}

impl Subscription {
    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    /// receiver that wakes on every status change
    pub fn status_changes(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// number of successful namespace connects so far
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop delivery and release the connection.
    ///
    /// once this returns the handler is never called again. must not be
    /// called from inside the handler itself.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        // taking the handler waits out a dispatch already in progress
        let detached = self.handler.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = self.task.take() {
            task.abort();
            if detached.is_some() {
                tracing::info!("telemetry channel closed by subscriber");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

struct Supervisor {
    channel: TelemetryChannel,
    handler: SharedHandler,
    status: watch::Sender<ChannelStatus>,
    connections: Arc<AtomicU64>,
}

impl Supervisor {
    async fn run(self) {
        let initial = self.channel.reconnect.initial_delay();
        let max = self.channel.reconnect.max_delay();
        let mut delay = initial;

        loop {
            let _ = self.status.send(ChannelStatus::Connecting);
            tracing::debug!(url = %self.channel.url, "connecting to sensor stream");

            let mut established = false;
            let outcome = self.run_connection(&mut established).await;
            let _ = self.status.send(ChannelStatus::Disconnected);

            match outcome {
                Ok(()) => tracing::warn!("sensor stream closed by server"),
                Err(e) if established => tracing::warn!(error = %e, "sensor stream disconnected"),
                Err(e) => tracing::error!(error = %e, "sensor stream connection failed"),
            }

            if established {
                delay = initial;
            }
            tracing::debug!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(max);
        }
    }

    /// One connection from dial to close.
    ///
    /// `Ok(())` means the server closed the transport cleanly.
    async fn run_connection(&self, established: &mut bool) -> Result<()> {
        let nsp = self.channel.namespace.as_str();
        let (ws, _) = tokio_tungstenite::connect_async(self.channel.url.as_str()).await?;
        let (mut write, mut read) = ws.split();

        let handshake = loop {
            let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, read.next())
                .await
                .map_err(|_| MonitorError::Transport("no engine.io handshake".to_string()))?;
            match frame {
                Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text)? {
                    EnginePacket::Open(handshake) => break handshake,
                    other => tracing::debug!(packet = ?other, "ignoring packet before handshake"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(MonitorError::Transport("closed during handshake".to_string()))
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        };
        tracing::debug!(sid = %handshake.sid, "engine.io session opened");

        // server pings every ping_interval and expects us alive within ping_timeout
        let liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
        write.send(Message::Text(protocol::connect_frame(nsp))).await?;

        loop {
            let frame = tokio::time::timeout(liveness, read.next())
                .await
                .map_err(|_| MonitorError::Transport("ping timeout".to_string()))?;

            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };

            let packet = match EnginePacket::decode(&text) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed frame");
                    continue;
                }
            };

            match packet {
                EnginePacket::Ping(payload) => {
                    write.send(Message::Text(EnginePacket::Pong(payload).encode())).await?;
                }
                EnginePacket::Message(body) => {
                    let packet = match SocketPacket::decode(&body) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping malformed socket.io packet");
                            continue;
                        }
                    };
                    if packet.nsp() != nsp {
                        tracing::debug!(nsp = packet.nsp(), "ignoring packet for other namespace");
                        continue;
                    }
                    match &packet {
                        SocketPacket::Connect { .. } => {
                            *established = true;
                            self.connections.fetch_add(1, Ordering::SeqCst);
                            let _ = self.status.send(ChannelStatus::Connected);
                            tracing::info!(nsp, "sensor stream connected, requesting backlog");
                            write.send(Message::Text(protocol::backlog_request_frame(nsp))).await?;
                        }
                        SocketPacket::Disconnect { .. } => {
                            return Err(MonitorError::Transport("server left namespace".to_string()));
                        }
                        SocketPacket::ConnectError { data, .. } => {
                            return Err(MonitorError::Protocol(format!(
                                "namespace connect refused: {}",
                                data.as_ref().map(|d| d.to_string()).unwrap_or_default()
                            )));
                        }
                        SocketPacket::Event { .. } => self.handle_event(&packet),
                        SocketPacket::Ack { .. } => {}
                    }
                }
                EnginePacket::Close => return Ok(()),
                EnginePacket::Open(_) | EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {}
            }
        }
    }

    fn handle_event(&self, packet: &SocketPacket) {
        let Some((name, args)) = packet.event_parts() else {
            tracing::warn!("dropping event without a name");
            return;
        };
        match TelemetryEvent::from_event(name, args) {
            Ok(Some(event)) => self.dispatch(event.into_batch()),
            Ok(None) => tracing::debug!(event = name, "ignoring unhandled event"),
            Err(e) => tracing::warn!(event = name, error = %e, "dropping malformed telemetry payload"),
        }
    }

    fn dispatch(&self, batch: Vec<SensorReading>) {
        let mut guard = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handler) = guard.as_mut() {
            handler(batch);
        }
    }
}
