//! Process wiring: log backend, hub, listeners and shutdown.

use crate::config::{Config, LogBackend};
use crate::{bridge, delivery, ingest, metrics};
use anyhow::{Context, Result};
use axum::{response::IntoResponse, routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use trackhub_core::Hub;
use trackhub_log::{
    FileConsumer, FileLog, FileLogConfig, LogConsumer, LogPublisher, MemoryLog,
};

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// The two ends of the durable log, as needed by the enabled roles.
struct LogEnds {
    publisher: Option<Arc<dyn LogPublisher>>,
    consumer: Option<Box<dyn LogConsumer>>,
    memory: Option<MemoryLog>,
}

async fn open_log(config: &Config, shutdown: watch::Receiver<bool>) -> Result<LogEnds> {
    match config.log.backend {
        LogBackend::Memory => {
            let log = MemoryLog::new();
            info!("Using in-memory log");
            Ok(LogEnds {
                publisher: Some(Arc::new(log.clone())),
                consumer: Some(Box::new(log.consumer(config.log.start_from))),
                memory: Some(log),
            })
        }
        LogBackend::File => {
            let path = config.log_path();
            let mut ends = LogEnds {
                publisher: None,
                consumer: None,
                memory: None,
            };

            if config.ingest.enabled {
                let log = FileLog::open(FileLogConfig {
                    path: path.clone(),
                    sync: config.log.sync,
                    poll_interval: config.poll_interval(),
                })
                .await
                .with_context(|| format!("Failed to open log {}", path.display()))?;

                if config.delivery.enabled {
                    let consumer = log.consumer(config.log.start_from, shutdown.clone()).await?;
                    ends.consumer = Some(Box::new(consumer));
                }
                ends.publisher = Some(Arc::new(log));
            } else if config.delivery.enabled {
                let consumer = FileConsumer::open(
                    &path,
                    config.log.start_from,
                    config.poll_interval(),
                    shutdown,
                )
                .await
                .with_context(|| format!("Failed to open log {}", path.display()))?;
                ends.consumer = Some(Box::new(consumer));
            }

            Ok(ends)
        }
    }
}

fn spawn_listener(
    name: &'static str,
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stop = async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stop).await {
            error!(listener = name, error = %e, "Listener failed");
        }
        info!(listener = name, "Listener stopped");
    })
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))
}

/// Run every enabled role until `signal` resolves, then shut down in order.
///
/// # Errors
///
/// Returns an error if the log cannot be opened or a listener cannot bind.
pub async fn run(config: Config, signal: impl Future<Output = ()>) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(&config.host, config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let hub = Arc::new(Hub::with_config(config.hub.clone()));
    // A delivery-only process waits here until the log file exists.
    tokio::pin!(signal);
    let log = tokio::select! {
        log = open_log(&config, shutdown_rx.clone()) => log?,
        () = &mut signal => {
            info!("Shutdown signal received before the log was ready");
            return Ok(());
        }
    };

    let mut ingest_task = None;
    if let Some(publisher) = log.publisher.clone() {
        let addr = config.ingest_addr()?;
        let listener = bind(addr).await?;
        let app = ingest::router(
            &config.ingest.path,
            Arc::new(ingest::IngestState { publisher }),
        )
        .route("/health", get(health_handler));

        info!("Ingestion endpoint: http://{}{}", addr, config.ingest.path);
        ingest_task = Some(spawn_listener("ingest", listener, app, shutdown_rx.clone()));
    }

    let mut delivery_task = None;
    let mut bridge_task = None;
    if let Some(consumer) = log.consumer {
        let addr = config.delivery_addr()?;
        let listener = bind(addr).await?;
        let app = delivery::router(
            &config.delivery.path,
            Arc::new(delivery::DeliveryState {
                hub: Arc::clone(&hub),
                session_header: config.delivery.session_header.clone(),
            }),
        )
        .route("/health", get(health_handler));

        info!("Delivery endpoint: ws://{}{}", addr, config.delivery.path);
        delivery_task = Some(spawn_listener("delivery", listener, app, shutdown_rx.clone()));
        bridge_task = Some(tokio::spawn(bridge::run(
            consumer,
            Arc::clone(&hub),
            shutdown_rx.clone(),
        )));
    }

    signal.await;
    info!("Shutdown signal received");

    hub.begin_drain();
    let _ = shutdown_tx.send(true);

    let memory = log.memory;
    let stopped = tokio::time::timeout(config.shutdown_timeout(), async {
        // No appends can race the end of the stream once ingestion has stopped.
        if let Some(task) = ingest_task {
            let _ = task.await;
        }
        if let Some(memory) = &memory {
            memory.close();
        }
        if let Some(task) = bridge_task {
            let _ = task.await;
        }
        if let Some(task) = delivery_task {
            let _ = task.await;
        }
    })
    .await;

    if stopped.is_err() {
        warn!(
            timeout_ms = config.shutdown_timeout_ms,
            "Graceful shutdown timed out; closing remaining subscribers"
        );
        hub.finish_drain();
    }

    info!(stats = ?hub.stats(), "Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(dir: &tempfile::TempDir, backend: LogBackend) -> Config {
        let mut config = Config::default();
        config.ingest.port = 0;
        config.delivery.port = 0;
        config.metrics.enabled = false;
        config.shutdown_timeout_ms = 2_000;
        config.log.backend = backend;
        config.log.path = dir.path().join("locations.log").display().to_string();
        config
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        for backend in [LogBackend::Memory, LogBackend::File] {
            let dir = tempfile::tempdir().unwrap();
            let config = test_config(&dir, backend);
            let (tx, rx) = tokio::sync::oneshot::channel::<()>();

            let server = tokio::spawn(run(config, async move {
                let _ = rx.await;
            }));
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(()).unwrap();

            tokio::time::timeout(Duration::from_secs(5), server)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_delivery_only_role_waits_for_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, LogBackend::File);
        config.ingest.enabled = false;
        let path = config.log_path();
        let (_tx, rx) = watch::channel(false);

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            FileLog::open(FileLogConfig {
                path,
                ..FileLogConfig::default()
            })
            .await
            .unwrap()
        });

        let ends = tokio::time::timeout(Duration::from_secs(5), open_log(&config, rx))
            .await
            .unwrap()
            .unwrap();
        assert!(ends.publisher.is_none());
        assert!(ends.consumer.is_some());
        let _log = writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_delivery_only_run_stops_before_log_exists() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, LogBackend::File);
        config.ingest.enabled = false;

        tokio::time::timeout(
            Duration::from_secs(5),
            run(config, tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!dir.path().join("locations.log").exists());
    }
}
