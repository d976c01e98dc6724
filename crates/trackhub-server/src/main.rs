//! # Trackhub Server
//!
//! Realtime vehicle location server. Drivers post positions over HTTP, the
//! positions are appended to a durable log, and a single log consumer fans
//! each one out to every connected customer over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run both roles with default settings
//! trackhub
//!
//! # Run with a custom config file
//! TRACKHUB_CONFIG=/path/to/trackhub.toml trackhub
//!
//! # Run only the delivery role, overriding values from the environment
//! TRACKHUB_INGEST__ENABLED=false TRACKHUB_DELIVERY__PORT=9000 trackhub
//! ```

mod bridge;
mod config;
mod delivery;
mod ingest;
mod metrics;
mod server;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::load()?;

    // Initialize tracing
    let default_filter = if config.debug {
        "trackhub=debug"
    } else {
        "trackhub=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        ingest = config.ingest.enabled,
        delivery = config.delivery.enabled,
        backend = ?config.log.backend,
        "Starting trackhub on {}",
        config.host
    );

    // Initialize metrics
    metrics::init_metrics();

    server::run(config, server::shutdown_signal()).await
}
