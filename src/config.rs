//! ==============================================================================
//! config.rs - Monitor Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `monitor.toml`.
//!     loads configuration from file or falls back to defaults.
//!     derives every backend address from the single base url.
//!
//! structure:
//!     - BackendConfig: base url (overridable via BACKEND_URL) and http timeout.
//!     - TelemetryConfig: socket.io namespace, window size, merge policy.
//!     - ReconnectConfig: backoff bounds for the stream supervisor.
//!     - RelaysConfig: what to do when a relay write fails.
//!     - ApiConfig: local json bridge for the presentation layer.
//!     - LoggingConfig: default level and whether readings are echoed.
//!
//! ==============================================================================

use crate::error::{MonitorError, Result};
use crate::relay::FailurePolicy;
use crate::store::IngestPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// environment variable that overrides `backend.base_url`
pub const BACKEND_URL_ENV: &str = "BACKEND_URL";

/// shortest wait between two dials of the sensor stream
pub const MIN_RECONNECT_DELAY_MS: u64 = 50;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MonitorConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub relays: RelaysConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// file this config was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub stream_namespace: String,
    pub window_capacity: usize,
    pub policy: IngestPolicy,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RelaysConfig {
    pub on_failure: FailurePolicy,
    /// render switches as checked when the relay is *disengaged*
    pub invert_switch: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            stream_namespace: "/sensors".to_string(),
            window_capacity: 15,
            policy: IngestPolicy::Append,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { initial_delay_ms: 800, max_delay_ms: 30_000 }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: true, bind: "127.0.0.1:3000".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl ReconnectConfig {
    /// never below `MIN_RECONNECT_DELAY_MS`
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms.max(MIN_RECONNECT_DELAY_MS))
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms).max(self.initial_delay())
    }
}

impl MonitorConfig {
    /// Parse configuration from a toml string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: MonitorConfig = toml::from_str(content)
            .map_err(|e| MonitorError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_toml(&content)?;
        config.source = Some(path.as_ref().to_path_buf());
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// a file that exists but fails to parse is skipped; the returned
    /// warnings are logged by the caller once tracing is up.
    pub fn load_or_default() -> (Self, Vec<String>) {
        let paths = [
            PathBuf::from("config").join("monitor.toml"),
            PathBuf::from("..").join("config").join("monitor.toml"),
        ];

        let mut warnings = Vec::new();
        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => return (config, warnings),
                    Err(e) => warnings.push(format!("Failed to load {}: {}", path.display(), e)),
                }
            }
        }

        warnings.push("No config file found - using defaults".to_string());
        (Self::default(), warnings)
    }

    /// Replace the backend url when the override is set and non-empty
    pub fn with_backend_override(mut self, url: Option<String>) -> Result<Self> {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.backend.base_url = url.trim().to_string();
            self.validate()?;
        }
        Ok(self)
    }

    /// Apply `BACKEND_URL` from the process environment
    pub fn apply_env(self) -> Result<Self> {
        self.with_backend_override(std::env::var(BACKEND_URL_ENV).ok())
    }

    fn validate(&self) -> Result<()> {
        let url = &self.backend.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(MonitorError::Config(format!(
                "backend.base_url must start with http:// or https:// (got '{}')",
                url
            )));
        }
        if self.telemetry.window_capacity == 0 {
            return Err(MonitorError::Config("telemetry.window_capacity must be > 0".to_string()));
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(MonitorError::Config("reconnect.initial_delay_ms must be > 0".to_string()));
        }
        if !self.telemetry.stream_namespace.starts_with('/') {
            return Err(MonitorError::Config(format!(
                "telemetry.stream_namespace must start with '/' (got '{}')",
                self.telemetry.stream_namespace
            )));
        }
        Ok(())
    }

    fn base(&self) -> &str {
        self.backend.base_url.trim_end_matches('/')
    }

    pub fn relay_status_url(&self) -> String {
        format!("{}/relay/status", self.base())
    }

    pub fn relay_update_url(&self) -> String {
        format!("{}/relay/update", self.base())
    }

    /// websocket address of the socket.io endpoint (websocket transport only)
    pub fn stream_url(&self) -> String {
        let base = self.base();
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/socket.io/?EIO=4&transport=websocket", ws)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs.max(1))
    }

    /// Log a configuration summary
    pub fn log_summary(&self) {
        match &self.source {
            Some(path) => tracing::info!(path = %path.display(), "config loaded"),
            None => tracing::info!("config: built-in defaults"),
        }
        tracing::info!(
            backend = %self.backend.base_url,
            stream = %self.stream_url(),
            namespace = %self.telemetry.stream_namespace,
            window = self.telemetry.window_capacity,
            policy = ?self.telemetry.policy,
            on_failure = ?self.relays.on_failure,
            "monitor configuration"
        );
    }
}
