//! Durable log abstraction traits.
//!
//! The ingestion side only ever sees a [`LogPublisher`]; the delivery side only
//! ever sees a [`LogConsumer`]. Either can be swapped for another backend
//! without touching the hub.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trackhub_protocol::{LocationEvent, ProtocolError};

/// Durable log errors.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log has been closed for writing.
    #[error("Log closed")]
    Closed,

    /// Record encoding or decoding failed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Where a new consumer starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartFrom {
    /// Replay every retained record.
    Beginning,
    /// Only records appended after the consumer was created.
    #[default]
    End,
}

/// Write side of the durable log.
#[async_trait]
pub trait LogPublisher: Send + Sync {
    /// Append one event, keyed by its source id.
    ///
    /// Returns once the record has been handed to the backend.
    async fn publish(&self, event: &LocationEvent) -> Result<(), LogError>;

    /// Backend name (e.g. "file", "memory").
    fn name(&self) -> &'static str;
}

/// Read side of the durable log.
#[async_trait]
pub trait LogConsumer: Send {
    /// Wait for the next event in log order.
    ///
    /// Returns `Ok(None)` once the stream has ended: the log was closed or a
    /// shutdown was requested and every retained record has been read.
    async fn next(&mut self) -> Result<Option<LocationEvent>, LogError>;

    /// Backend name (e.g. "file", "memory").
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_from_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            start_from: StartFrom,
        }

        let w: Wrapper = toml::from_str(r#"start_from = "beginning""#).unwrap();
        assert_eq!(w.start_from, StartFrom::Beginning);
        assert_eq!(StartFrom::default(), StartFrom::End);
    }
}
