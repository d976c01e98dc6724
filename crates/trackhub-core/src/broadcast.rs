//! Broadcast engine.
//!
//! One event is offered to every subscriber in a snapshot with a single
//! non-blocking enqueue attempt each. A full or closed mailbox only affects
//! its own subscriber.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

use crate::registry::Subscription;
use crate::subscriber::Registration;
use crate::LocationEvent;

/// What to do when a subscriber's mailbox is full at broadcast time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the incoming event for that subscriber only; what is already
    /// queued is kept.
    #[default]
    DropNewest,
    /// Drop the event and close the subscriber's mailbox, forcing its
    /// gateway to disconnect.
    Disconnect,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers in the snapshot.
    pub attempted: usize,
    /// Mailboxes the event was enqueued onto.
    pub delivered: usize,
    /// Subscribers skipped because their mailbox was full.
    pub dropped_full: usize,
    /// Subscribers skipped because their mailbox was already closed.
    pub dropped_closed: usize,
    /// Subscribers removed from the registry after this broadcast.
    pub evicted: usize,
}

impl BroadcastReport {
    /// Total subscribers that did not get the event.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped_full + self.dropped_closed
    }
}

/// Offer `event` to every subscription in `snapshot`.
///
/// Returns the report and the registrations that should be removed: closed
/// mailboxes always, full ones under [`OverflowPolicy::Disconnect`].
pub(crate) fn fan_out(
    snapshot: &[Subscription],
    event: &Arc<LocationEvent>,
    policy: OverflowPolicy,
) -> (BroadcastReport, Vec<Registration>) {
    let mut report = BroadcastReport {
        attempted: snapshot.len(),
        ..BroadcastReport::default()
    };
    let mut evict = Vec::new();

    for subscription in snapshot {
        match subscription.sender().try_send(Arc::clone(event)) {
            Ok(()) => report.delivered += 1,
            Err(TrySendError::Full(_)) => {
                report.dropped_full += 1;
                trace!(subscriber = %subscription.id(), "Mailbox full, event dropped");
                if policy == OverflowPolicy::Disconnect {
                    evict.push(subscription.registration());
                }
            }
            Err(TrySendError::Closed(_)) => {
                report.dropped_closed += 1;
                trace!(subscriber = %subscription.id(), "Mailbox closed, event dropped");
                evict.push(subscription.registration());
            }
        }
    }

    (report, evict)
}
