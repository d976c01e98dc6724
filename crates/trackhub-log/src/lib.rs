//! # trackhub-log
//!
//! Durable log plumbing for the trackhub location relay.
//!
//! The log decouples drivers from customers in time and process: the
//! ingestion gateway appends through a [`LogPublisher`], and the delivery
//! side reads through a [`LogConsumer`] in log order and feeds the hub.
//!
//! - **File** - append-only file of length-prefixed records, tailable across processes
//! - **Memory** - in-process log for single-process deployments and tests
//!
//! ```rust,ignore
//! use trackhub_log::{LogConsumer, StartFrom};
//!
//! async fn pump(mut consumer: impl LogConsumer, hub: &trackhub_core::Hub) {
//!     while let Ok(Some(event)) = consumer.next().await {
//!         hub.on_event(event);
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "file")]
pub mod file;

pub use memory::{MemoryConsumer, MemoryLog};
pub use traits::{LogConsumer, LogError, LogPublisher, StartFrom};

#[cfg(feature = "file")]
pub use file::{FileConsumer, FileLog, FileLogConfig};
