//! Codec for durable log records.
//!
//! This module provides MessagePack-based serialization with length-prefixed framing.
//! A log file starts with a short header (magic + format version) followed by
//! back-to-back records.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::location::LocationEvent;

/// Maximum record size (1 MiB).
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Magic bytes at the start of every log file.
pub const LOG_MAGIC: [u8; 4] = *b"THLG";

/// Log file header size in bytes (magic + major + minor).
pub const HEADER_SIZE: usize = LOG_MAGIC.len() + 2;

/// Format written by this build.
pub const LOG_FORMAT: FormatVersion = FormatVersion { major: 1, minor: 0 };

/// Format version stamped into a log file header.
///
/// A minor bump may add record fields; a major bump changes the framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatVersion {
    pub major: u8,
    pub minor: u8,
}

impl FormatVersion {
    /// Whether this build can read a log written in `self`.
    ///
    /// Same major, and no newer minor than [`LOG_FORMAT`].
    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.major == LOG_FORMAT.major && self.minor <= LOG_FORMAT.minor
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Protocol errors that can occur during encoding/decoding and validation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Record exceeds maximum size.
    #[error("Record size {0} exceeds maximum {MAX_RECORD_SIZE}")]
    RecordTooLarge(usize),

    /// Not enough data to decode a record.
    #[error("Incomplete record: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The log header is missing or malformed.
    #[error("Invalid log header")]
    InvalidHeader,

    /// The log was written with an incompatible format version.
    #[error("Unreadable log format {0} (this build reads up to {LOG_FORMAT})")]
    IncompatibleVersion(FormatVersion),

    /// Request body is not a valid location.
    #[error("Invalid request body: {0}")]
    InvalidBody(#[source] serde_json::Error),

    /// Source id is missing or invalid.
    #[error("Invalid source id: {0}")]
    MissingSource(&'static str),

    /// Timestamp is not RFC 3339.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[source] serde_json::Error),
}

/// One durable log record: an event keyed by its source id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Partitioning key, always the event's source id.
    pub key: String,
    pub event: LocationEvent,
}

impl LogRecord {
    /// Wrap an event, keying it by source id.
    #[must_use]
    pub fn new(event: LocationEvent) -> Self {
        Self {
            key: event.source_id().to_string(),
            event,
        }
    }
}

impl From<LocationEvent> for LogRecord {
    fn from(event: LocationEvent) -> Self {
        Self::new(event)
    }
}

/// Encode a record to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded record
///
/// # Errors
///
/// Returns an error if the record is too large or encoding fails.
pub fn encode(record: &LogRecord) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(record, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a record into an existing buffer.
///
/// # Errors
///
/// Returns an error if the record is too large or encoding fails.
pub fn encode_into(record: &LogRecord, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(record)?;

    if payload.len() > MAX_RECORD_SIZE {
        return Err(ProtocolError::RecordTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a record from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<LogRecord, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_RECORD_SIZE {
        return Err(ProtocolError::RecordTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let record = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(record)
}

/// Try to decode a record from a buffer, advancing it if a whole frame is present.
///
/// Returns `Ok(Some(record))` if a complete record was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error. A frame whose
/// body fails to decode is still consumed, so the caller can skip it.
///
/// # Errors
///
/// Returns an error if the record is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<LogRecord>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_RECORD_SIZE {
        return Err(ProtocolError::RecordTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let record = rmp_serde::from_slice(&payload)?;

    Ok(Some(record))
}

/// Encode the log file header for the current format version.
#[must_use]
pub fn encode_header() -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[..LOG_MAGIC.len()].copy_from_slice(&LOG_MAGIC);
    header[LOG_MAGIC.len()] = LOG_FORMAT.major;
    header[LOG_MAGIC.len() + 1] = LOG_FORMAT.minor;
    header
}

/// Validate a log file header.
///
/// # Errors
///
/// Returns an error if the magic is wrong or the file was written in a format
/// this build cannot read.
pub fn decode_header(data: &[u8]) -> Result<FormatVersion, ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::Incomplete(HEADER_SIZE - data.len()));
    }
    if data[..LOG_MAGIC.len()] != LOG_MAGIC {
        return Err(ProtocolError::InvalidHeader);
    }

    let version = FormatVersion {
        major: data[LOG_MAGIC.len()],
        minor: data[LOG_MAGIC.len() + 1],
    };
    if !version.is_readable() {
        return Err(ProtocolError::IncompatibleVersion(version));
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(source: &str, n: f64) -> LogRecord {
        LogRecord::new(LocationEvent::new(source, n, n, Utc::now()))
    }

    #[test]
    fn test_record_keyed_by_source() {
        let rec = record("bus-3", 1.0);
        assert_eq!(rec.key, "bus-3");

        let decoded = decode(&encode(&rec).unwrap()).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&record("bus-1", 0.0)).unwrap();

        let partial = &encoded[..5];
        match decode(partial) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_RECORD_SIZE + 1) as u32);
        buf.extend_from_slice(&[0u8; 8]);

        assert!(matches!(
            decode_from(&mut buf),
            Err(ProtocolError::RecordTooLarge(_))
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let first = record("bus-1", 1.0);
        let second = record("bus-2", 2.0);

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).unwrap();
        encode_into(&second, &mut buf).unwrap();
        let complete = buf.len();
        encode_into(&record("bus-3", 3.0), &mut buf).unwrap();
        buf.truncate(complete + 3);

        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), first);
        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), second);
        assert!(decode_from(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_garbage_frame_is_consumed() {
        let good = record("bus-1", 1.0);

        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.extend_from_slice(&[0xc1, 0xc1, 0xc1]);
        encode_into(&good, &mut buf).unwrap();

        assert!(matches!(
            decode_from(&mut buf),
            Err(ProtocolError::Decode(_))
        ));
        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), good);
    }

    #[test]
    fn test_header() {
        let header = encode_header();
        assert_eq!(decode_header(&header).unwrap(), LOG_FORMAT);

        let mut bad = header;
        bad[0] = b'X';
        assert!(matches!(decode_header(&bad), Err(ProtocolError::InvalidHeader)));

        let mut future = header;
        future[LOG_MAGIC.len()] = LOG_FORMAT.major + 1;
        assert!(matches!(
            decode_header(&future),
            Err(ProtocolError::IncompatibleVersion(_))
        ));
    }

    #[test]
    fn test_newer_minor_is_unreadable() {
        let mut newer = encode_header();
        newer[LOG_MAGIC.len() + 1] = LOG_FORMAT.minor + 1;
        let err = decode_header(&newer).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::IncompatibleVersion(FormatVersion { major: 1, minor: 1 })
        ));
        assert_eq!(
            err.to_string(),
            "Unreadable log format 1.1 (this build reads up to 1.0)"
        );

        let older = FormatVersion { major: LOG_FORMAT.major, minor: 0 };
        assert!(older.is_readable());
        assert!(!FormatVersion { major: 0, minor: 0 }.is_readable());
    }
}
