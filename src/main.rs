//! ==============================================================================
//! main.rs - iot monitor entry point
//! ==============================================================================
//!
//! purpose:
//!     runs the client core against one backend: streams sensor readings
//!     into a bounded window, loads and controls the four relays, and
//!     exposes both to the presentation layer over a local json bridge.
//!
//! responsibilities:
//!     - load monitor.toml (BACKEND_URL overrides the backend address)
//!     - initialize tracing
//!     - fetch the initial relay snapshot (failure is non-fatal)
//!     - open the sensor stream (reconnects on its own)
//!     - serve the json bridge until ctrl-c
//!
//! architecture:
//!
//!     ┌───────────────────────────────────────────────────────────┐
//!     │                    iot-monitor (this file)                │
//!     │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   │
//!     │  │ sensor stream│──▶│ telemetry    │◀──│ json bridge  │   │
//!     │  │ (socket.io)  │   │ store        │   │ (port 3000)  │   │
//!     │  └──────────────┘   └──────────────┘   └──────┬───────┘   │
//!     │                                               │ toggle    │
//!     │                     ┌──────────────┐          │           │
//!     │                     │ relay        │◀─────────┘           │
//!     │                     │ coordinator  │──▶ POST /relay/update │
//!     │                     └──────────────┘                      │
//!     └───────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

use anyhow::{Context, Result};
use iot_monitor::api::{self, ApiState};
use iot_monitor::{HttpRelayBackend, Monitor, MonitorConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration
    let (config, warnings) = MonitorConfig::load_or_default();
    let config = config.apply_env().context("invalid BACKEND_URL")?;

    // step 2: logging (RUST_LOG wins over the config level)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }
    config.log_summary();

    // step 3: relay coordinator and its initial snapshot
    let backend = HttpRelayBackend::new(&config).context("failed to build http client")?;
    let mut monitor = Monitor::new(&config, Arc::new(backend));
    monitor.relays().load_initial().await;

    // step 4: sensor stream
    monitor.start();

    // step 5: json bridge for the presentation layer
    if config.api.enabled {
        let state = ApiState {
            store: monitor.store().clone(),
            relays: monitor.relays().clone(),
            stream: monitor.status_changes(),
        };
        let listener = tokio::net::TcpListener::bind(&config.api.bind)
            .await
            .with_context(|| format!("failed to bind {}", config.api.bind))?;
        tracing::info!(bind = %config.api.bind, "json bridge listening");
        tokio::spawn(async move {
            if let Err(e) = api::serve(listener, state).await {
                tracing::error!(error = %e, "json bridge stopped");
            }
        });
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    monitor.stop();
    Ok(())
}
