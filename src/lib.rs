//! Live telemetry and relay control core for a sensor/relay backend.
//!
//! read path:  backend ─▶ [`channel`] ─▶ [`store`] ─▶ presentation
//! write path: presentation ─▶ [`relay`] ─▶ backend (optimistic local echo)

pub mod api;
pub mod channel;
pub mod config;
pub mod domain;
pub mod error;
pub mod monitor;
pub mod observer;
pub mod protocol;
pub mod relay;
pub mod store;

pub use channel::{ChannelStatus, Subscription, TelemetryChannel};
pub use config::MonitorConfig;
pub use domain::{RelayId, RelayState, SensorReading};
pub use error::{MonitorError, Result};
pub use monitor::Monitor;
pub use relay::{FailurePolicy, HttpRelayBackend, RelayBackend, RelayCoordinator, WriteOutcome};
pub use store::{IngestPolicy, TelemetrySnapshot, TelemetryStore};
