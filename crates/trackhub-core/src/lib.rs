//! # trackhub-core
//!
//! The real-time fan-out hub for the trackhub location relay.
//!
//! - **Registry** - the set of registered subscribers and their mailboxes
//! - **Broadcast** - non-blocking fan-out of one event to every mailbox
//! - **Hub** - registry + broadcast + the Running/Draining/Drained lifecycle
//! - **Subscriber** - subscriber identity and the mailbox receive handle
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  on_event   ┌─────────────┐  try_send   ┌─────────────┐
//! │ Log consumer │────────────▶│     Hub     │────────────▶│  Mailbox N  │──▶ gateway N
//! └──────────────┘             └─────────────┘             └─────────────┘
//!                                     │ snapshot
//!                                     ▼
//!                              ┌─────────────┐
//!                              │  Registry   │◀── register / unregister
//!                              └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use trackhub_core::{Hub, LocationEvent};
//!
//! let hub = Hub::new();
//! let mut mailbox = hub.register("customer-1").unwrap();
//!
//! let report = hub.on_event(LocationEvent::now("bus-42", 106.82, -6.17));
//! assert_eq!(report.delivered, 1);
//! assert_eq!(mailbox.try_recv().unwrap().source_id(), "bus-42");
//!
//! hub.unregister("customer-1");
//! assert!(mailbox.try_recv().is_err());
//! ```

pub mod broadcast;
pub mod hub;
pub mod registry;
pub mod subscriber;

pub use broadcast::{BroadcastReport, OverflowPolicy};
pub use hub::{Hub, HubConfig, HubError, HubState, HubStats, DEFAULT_MAILBOX_CAPACITY};
pub use registry::{Registry, Subscription};
pub use subscriber::{Mailbox, Registration, SubscriberId};
pub use trackhub_protocol::LocationEvent;
