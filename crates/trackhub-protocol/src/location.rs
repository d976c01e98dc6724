//! The location event model.
//!
//! A [`LocationEvent`] is the single unit of data that flows from a driver,
//! through the durable log, into the hub and out to every customer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum source identifier length.
pub const MAX_SOURCE_ID_LENGTH: usize = 256;

/// Validate a source identifier.
///
/// # Errors
///
/// Returns an error message if the identifier is empty, too long or contains
/// control characters.
pub fn validate_source_id(source_id: &str) -> Result<(), &'static str> {
    if source_id.is_empty() {
        return Err("Source id cannot be empty");
    }
    if source_id.len() > MAX_SOURCE_ID_LENGTH {
        return Err("Source id too long");
    }
    if source_id.chars().any(char::is_control) {
        return Err("Source id contains invalid characters");
    }
    Ok(())
}

/// A single location reading emitted by a source (for example a bus).
///
/// Events are immutable once built. Timestamps are non-decreasing per source
/// in the emitter's own stream; nothing is implied across sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationEvent {
    longitude: f64,
    latitude: f64,
    timestamp: DateTime<Utc>,
    source_id: String,
}

impl LocationEvent {
    /// Create a new event.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        longitude: f64,
        latitude: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            longitude,
            latitude,
            timestamp,
            source_id: source_id.into(),
        }
    }

    /// Create an event stamped with the current time.
    #[must_use]
    pub fn now(source_id: impl Into<String>, longitude: f64, latitude: f64) -> Self {
        Self::new(source_id, longitude, latitude, Utc::now())
    }

    #[must_use]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    #[must_use]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Origin time of the reading.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Identifier of the emitting source, also the durable log key.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// `(longitude, latitude)` pair.
    #[must_use]
    pub fn coordinates(&self) -> (f64, f64) {
        (self.longitude, self.latitude)
    }
}
