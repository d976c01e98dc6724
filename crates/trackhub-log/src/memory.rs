//! In-process durable log.
//!
//! Retains every event in memory in publish order. Used when ingestion and
//! delivery share one process without a log file, and in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;
use trackhub_protocol::LocationEvent;

use crate::traits::{LogConsumer, LogError, LogPublisher, StartFrom};

struct Shared {
    records: Mutex<Records>,
    notify: Notify,
}

struct Records {
    events: Vec<LocationEvent>,
    closed: bool,
}

/// An in-memory log. Cloning yields another handle to the same log.
#[derive(Clone)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

impl MemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                records: Mutex::new(Records {
                    events: Vec::new(),
                    closed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Create a consumer positioned at the beginning or the current end.
    #[must_use]
    pub fn consumer(&self, start: StartFrom) -> MemoryConsumer {
        let position = match start {
            StartFrom::Beginning => 0,
            StartFrom::End => self.len(),
        };
        MemoryConsumer {
            shared: Arc::clone(&self.shared),
            position,
        }
    }

    /// Stop accepting events. Consumers end their stream once they catch up.
    pub fn close(&self) {
        self.shared.records.lock().closed = true;
        self.shared.notify.notify_waiters();
        debug!("Memory log closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.records.lock().closed
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.records.lock().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogPublisher for MemoryLog {
    async fn publish(&self, event: &LocationEvent) -> Result<(), LogError> {
        {
            let mut records = self.shared.records.lock();
            if records.closed {
                return Err(LogError::Closed);
            }
            records.events.push(event.clone());
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Reader of a [`MemoryLog`].
pub struct MemoryConsumer {
    shared: Arc<Shared>,
    position: usize,
}

enum Poll {
    Ready(LocationEvent),
    Ended,
    Pending,
}

impl MemoryConsumer {
    fn poll_next(&mut self) -> Poll {
        let records = self.shared.records.lock();
        if let Some(event) = records.events.get(self.position) {
            self.position += 1;
            Poll::Ready(event.clone())
        } else if records.closed {
            Poll::Ended
        } else {
            Poll::Pending
        }
    }
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Option<LocationEvent>, LogError> {
        loop {
            // Register interest before checking so a concurrent publish is not missed.
            let shared = Arc::clone(&self.shared);
            let notified = shared.notify.notified();
            match self.poll_next() {
                Poll::Ready(event) => return Ok(Some(event)),
                Poll::Ended => return Ok(None),
                Poll::Pending => notified.await,
            }
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_consumer_reads_in_publish_order() {
        let log = MemoryLog::new();
        for i in 0..3 {
            log.publish(&LocationEvent::now("bus-1", f64::from(i), 0.0))
                .await
                .unwrap();
        }

        let mut consumer = log.consumer(StartFrom::Beginning);
        for i in 0..3 {
            let event = consumer.next().await.unwrap().unwrap();
            assert_eq!(event.longitude(), f64::from(i));
        }
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_publish() {
        let log = MemoryLog::new();
        let mut consumer = log.consumer(StartFrom::End);

        let writer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer
                .publish(&LocationEvent::now("bus-9", 1.0, 2.0))
                .await
                .unwrap();
        });

        let event = tokio::time::timeout(Duration::from_secs(5), consumer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.source_id(), "bus-9");
    }

    #[tokio::test]
    async fn test_close_ends_stream_after_drain() {
        let log = MemoryLog::new();
        let mut consumer = log.consumer(StartFrom::End);

        log.publish(&LocationEvent::now("bus-1", 0.0, 0.0)).await.unwrap();
        log.close();

        assert!(matches!(
            log.publish(&LocationEvent::now("bus-1", 1.0, 1.0)).await,
            Err(LogError::Closed)
        ));
        assert!(consumer.next().await.unwrap().is_some());
        assert!(consumer.next().await.unwrap().is_none());
    }
}
