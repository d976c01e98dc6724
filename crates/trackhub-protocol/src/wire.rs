//! JSON wire formats.
//!
//! Drivers post a [`LocationRequest`] with the bus id in the query string.
//! Customers receive a [`LocationUpdate`] per event on their WebSocket.
//! Every HTTP response body is a [`Response`] envelope.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::ProtocolError;
use crate::location::{validate_source_id, LocationEvent};

/// Parse an RFC 3339 timestamp, fractional seconds optional.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidTimestamp`] if the value is not RFC 3339.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ProtocolError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| ProtocolError::InvalidTimestamp(value.to_string()))
}

/// Format a timestamp as RFC 3339 in UTC with sub-second precision.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Body of a driver's location post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRequest {
    /// Missing coordinates read as 0.
    #[serde(default)]
    pub long: f64,
    #[serde(default)]
    pub lat: f64,
    /// Origin time; receipt time is used when absent or empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl LocationRequest {
    /// Decode a request body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidBody`] if the body is not a valid request.
    pub fn from_json(body: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(body).map_err(ProtocolError::InvalidBody)
    }

    /// Turn the request into an event for `source_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingSource`] for an invalid source id and
    /// [`ProtocolError::InvalidTimestamp`] for an unparseable timestamp.
    pub fn into_event(
        self,
        source_id: &str,
        received_at: DateTime<Utc>,
    ) -> Result<LocationEvent, ProtocolError> {
        validate_source_id(source_id).map_err(ProtocolError::MissingSource)?;

        let timestamp = match self.timestamp.as_deref() {
            None | Some("") => received_at,
            Some(raw) => parse_timestamp(raw)?,
        };

        Ok(LocationEvent::new(source_id, self.long, self.lat, timestamp))
    }
}

/// A location update as delivered to a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub long: f64,
    pub lat: f64,
    pub timestamp: String,
    pub bus_id: String,
}

impl LocationUpdate {
    /// Encode as a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Json)
    }
}

impl From<&LocationEvent> for LocationUpdate {
    fn from(event: &LocationEvent) -> Self {
        Self {
            long: event.longitude(),
            lat: event.latitude(),
            timestamp: format_timestamp(&event.timestamp()),
            bus_id: event.source_id().to_string(),
        }
    }
}

/// HTTP response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    #[must_use]
    pub fn data(data: impl Into<serde_json::Value>) -> Self {
        Self {
            data: Some(data.into()),
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
        }
    }
}
