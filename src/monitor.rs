//! Wires the telemetry channel into the store and owns the relay coordinator.
//!
//! This is the object the presentation side holds on to: it reads
//! snapshots from `store()` / `relays()` and sends toggle intents to
//! `relays().toggle(..)`.

use crate::channel::{ChannelStatus, Subscription, TelemetryChannel};
use crate::config::MonitorConfig;
use crate::domain::SensorReading;
use crate::relay::{RelayBackend, RelayCoordinator};
use crate::store::TelemetryStore;
use std::sync::Arc;
use tokio::sync::watch;

pub struct Monitor {
    channel: TelemetryChannel,
    store: Arc<TelemetryStore>,
    relays: RelayCoordinator,
    subscription: Option<Subscription>,
    show_sensor_data: bool,
}

impl Monitor {
    pub fn new(config: &MonitorConfig, backend: Arc<dyn RelayBackend>) -> Self {
        Self {
            channel: TelemetryChannel::from_config(config),
            store: Arc::new(TelemetryStore::new(config.telemetry.window_capacity, config.telemetry.policy)),
            relays: RelayCoordinator::from_config(backend, config),
            subscription: None,
            show_sensor_data: config.logging.show_sensor_data,
        }
    }

    /// Open the sensor stream; a no-op while it is already open
    pub fn start(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        let store = self.store.clone();
        let show = self.show_sensor_data;
        tracing::info!(url = self.channel.url(), "starting sensor stream");
        self.subscription = Some(self.channel.connect(move |batch: Vec<SensorReading>| {
            if show {
                if let Some(newest) = batch.last() {
                    tracing::info!(
                        id = newest.id,
                        at = %newest.timestamp,
                        "Temp: {:.1}°C | Humidity: {:.1}% ({} reading(s))",
                        newest.temperature,
                        newest.humidity,
                        batch.len()
                    );
                }
            }
            store.ingest(&batch);
        }));
    }

    /// Close the sensor stream; no batch reaches the store afterwards
    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    pub fn channel_status(&self) -> ChannelStatus {
        self.subscription
            .as_ref()
            .map_or(ChannelStatus::Disconnected, Subscription::status)
    }

    /// status feed of the open stream, if any
    pub fn status_changes(&self) -> Option<watch::Receiver<ChannelStatus>> {
        self.subscription.as_ref().map(Subscription::status_changes)
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    pub fn relays(&self) -> &RelayCoordinator {
        &self.relays
    }
}
