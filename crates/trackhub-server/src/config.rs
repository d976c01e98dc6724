//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (`TRACKHUB_CONFIG`, or the first of the default paths that exists)
//! - Environment variables (`TRACKHUB_*`, nested keys joined with `__`,
//!   e.g. `TRACKHUB_HUB__MAILBOX_CAPACITY=128`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Semaphore;
use trackhub_core::HubConfig;
use trackhub_log::StartFrom;

/// Default configuration file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "trackhub.toml",
    "/etc/trackhub/trackhub.toml",
    "~/.config/trackhub/trackhub.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind every listener to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Verbose logging when `RUST_LOG` is not set.
    #[serde(default)]
    pub debug: bool,

    /// Upper bound on graceful shutdown, in milliseconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,

    /// Driver-facing ingestion endpoint.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Customer-facing delivery endpoint.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Fan-out hub settings.
    #[serde(default)]
    pub hub: HubConfig,

    /// Durable log settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Ingestion endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Run the ingestion listener in this process.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ingest_port")]
    pub port: u16,

    /// Path drivers post locations to.
    #[serde(default = "default_ingest_path")]
    pub path: String,
}

/// Delivery endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Run the delivery listener and the log consumer in this process.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_delivery_port")]
    pub port: u16,

    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub path: String,

    /// Header carrying the customer's session id.
    #[serde(default = "default_session_header")]
    pub session_header: String,
}

/// Durable log backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogBackend {
    /// Append-only file shared by the ingestion and delivery roles.
    #[default]
    File,
    /// In-process only; requires both roles in the same process.
    Memory,
}

/// Durable log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub backend: LogBackend,

    /// Log file path (file backend).
    #[serde(default = "default_log_path")]
    pub path: String,

    /// Where the delivery side starts reading.
    #[serde(default)]
    pub start_from: StartFrom,

    /// How often an idle consumer polls the file for growth.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// `fsync` after every record.
    #[serde(default)]
    pub sync: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_shutdown_timeout() -> u64 {
    5_000
}

fn default_ingest_port() -> u16 {
    8081
}

fn default_ingest_path() -> String {
    "/location".to_string()
}

fn default_delivery_port() -> u16 {
    8080
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_session_header() -> String {
    "Session-ID".to_string()
}

fn default_log_path() -> String {
    "trackhub.log".to_string()
}

fn default_poll_interval() -> u64 {
    50
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            debug: false,
            shutdown_timeout_ms: default_shutdown_timeout(),
            ingest: IngestConfig::default(),
            delivery: DeliveryConfig::default(),
            hub: HubConfig::default(),
            log: LogConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_ingest_port(),
            path: default_ingest_path(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_delivery_port(),
            path: default_ws_path(),
            session_header: default_session_header(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            backend: LogBackend::default(),
            path: default_log_path(),
            start_from: StartFrom::default(),
            poll_interval_ms: default_poll_interval(),
            sync: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// result is inconsistent.
    pub fn load() -> Result<Self> {
        let path = match std::env::var("TRACKHUB_CONFIG") {
            Ok(path) => Some(shellexpand::tilde(&path).into_owned()),
            Err(_) => CONFIG_PATHS
                .iter()
                .map(|p| shellexpand::tilde(p).into_owned())
                .find(|p| Path::new(p).exists()),
        };

        let config = Self::from_sources(path.as_deref().map(Path::new))?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from an optional file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong type.
    pub fn from_sources(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }

        builder
            .add_source(
                ::config::Environment::with_prefix("TRACKHUB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Check settings that only make sense together.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        if !self.ingest.enabled && !self.delivery.enabled {
            anyhow::bail!("At least one of ingest and delivery must be enabled");
        }
        if self.log.backend == LogBackend::Memory && !(self.ingest.enabled && self.delivery.enabled)
        {
            anyhow::bail!("The memory log backend requires ingest and delivery in one process");
        }
        let capacity = self.hub.mailbox_capacity;
        if capacity == 0 || capacity > Semaphore::MAX_PERMITS {
            anyhow::bail!(
                "hub.mailbox_capacity must be between 1 and {}",
                Semaphore::MAX_PERMITS
            );
        }
        Ok(())
    }

    /// Socket address of the ingestion listener.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a valid IP address.
    pub fn ingest_addr(&self) -> Result<SocketAddr> {
        self.addr(self.ingest.port)
    }

    /// Socket address of the delivery listener.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a valid IP address.
    pub fn delivery_addr(&self) -> Result<SocketAddr> {
        self.addr(self.delivery.port)
    }

    fn addr(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, port))
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.log.path).into_owned())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.log.poll_interval_ms)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
