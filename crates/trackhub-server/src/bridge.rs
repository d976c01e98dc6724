//! Durable log bridge: the single caller of `Hub::on_event`.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, trace};
use trackhub_core::Hub;
use trackhub_log::{LogConsumer, LogError};

use crate::metrics;

/// Pause before reading again after a failed read.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Feed every log record to the hub, in log order, until the stream ends.
///
/// The hub is drained on exit so every gateway observes its mailbox closing.
/// Returns the number of events broadcast.
pub async fn run(
    mut consumer: Box<dyn LogConsumer>,
    hub: Arc<Hub>,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    info!(backend = consumer.name(), "Log bridge started");
    let mut forwarded = 0u64;

    loop {
        match consumer.next().await {
            Ok(Some(event)) => {
                let start = Instant::now();
                let report = hub.on_event(event);
                metrics::record_broadcast(&report, start.elapsed());
                metrics::set_active_subscribers(hub.subscriber_count());
                trace!(delivered = report.delivered, dropped = report.dropped(), "Forwarded event");
                forwarded += 1;
            }
            Ok(None) => {
                info!("Log stream ended");
                break;
            }
            Err(LogError::Closed) => break,
            Err(LogError::Protocol(e)) => {
                // The reader cannot resynchronise past a bad frame.
                error!(error = %e, "Log stream is corrupt");
                metrics::record_error("log");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read from log");
                metrics::record_error("log");
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => {}
                    () = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }

    hub.begin_drain();
    let closed = hub.finish_drain();
    metrics::set_active_subscribers(0);
    info!(forwarded, closed, "Log bridge stopped");
    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackhub_core::HubState;
    use trackhub_log::{LogPublisher, MemoryLog, StartFrom};
    use trackhub_protocol::LocationEvent;

    #[tokio::test]
    async fn test_bridge_delivers_in_log_order_then_drains() {
        let log = MemoryLog::new();
        let hub = Arc::new(Hub::new());
        let (_tx, rx) = watch::channel(false);
        let mut mailbox = hub.register("customer-1").unwrap();

        for i in 0..5 {
            log.publish(&LocationEvent::now("bus-1", f64::from(i), 0.0))
                .await
                .unwrap();
        }
        log.close();

        let forwarded = run(Box::new(log.consumer(StartFrom::Beginning)), Arc::clone(&hub), rx).await;
        assert_eq!(forwarded, 5);
        assert_eq!(hub.state(), HubState::Drained);

        let longitudes: Vec<f64> = mailbox.drain().iter().map(|e| e.longitude()).collect();
        assert_eq!(longitudes, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert!(mailbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_bridge_follows_live_appends() {
        let log = MemoryLog::new();
        let hub = Arc::new(Hub::new());
        let (_tx, rx) = watch::channel(false);
        let mut mailbox = hub.register("customer-1").unwrap();

        let bridge = tokio::spawn(run(
            Box::new(log.consumer(StartFrom::End)),
            Arc::clone(&hub),
            rx,
        ));

        log.publish(&LocationEvent::now("bus-2", 1.0, 2.0))
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), mailbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.source_id(), "bus-2");

        log.close();
        assert_eq!(bridge.await.unwrap(), 1);
        assert!(!hub.is_running());
    }
}
