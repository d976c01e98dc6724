//! # trackhub-protocol
//!
//! Event model and wire formats for the trackhub location relay.
//!
//! - [`LocationEvent`] - the location reading every component passes around
//! - [`wire`] - JSON bodies exchanged with drivers and customers
//! - [`codec`] - length-prefixed MessagePack records stored in the durable log
//!
//! ## Example
//!
//! ```rust
//! use trackhub_protocol::{codec, LocationEvent, LogRecord};
//!
//! let event = LocationEvent::now("bus-42", 106.82, -6.17);
//! let encoded = codec::encode(&LogRecord::new(event.clone())).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.key, "bus-42");
//! assert_eq!(decoded.event, event);
//! ```

pub mod codec;
pub mod location;
pub mod wire;

pub use codec::{decode, encode, FormatVersion, LogRecord, ProtocolError, LOG_FORMAT};
pub use location::{validate_source_id, LocationEvent};
pub use wire::{format_timestamp, parse_timestamp, LocationRequest, LocationUpdate, Response};
