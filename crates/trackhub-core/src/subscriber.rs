//! Subscriber identity and the receive side of a subscriber's mailbox.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::LocationEvent;

/// Opaque identifier of a subscriber, supplied by the client session.
///
/// Cheap to clone; the hub copies ids into every broadcast snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(Arc<str>);

impl SubscriberId {
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Generate a session id for clients that did not supply one.
    #[must_use]
    pub fn generate() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::time::{SystemTime, UNIX_EPOCH};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::new(format!("session_{:x}_{:x}", nanos, counter))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SubscriberId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SubscriberId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Borrow<str> for SubscriberId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SubscriberId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifies one specific registration of a subscriber id.
///
/// Registering the same id twice yields two different registrations. A
/// gateway that unregisters through its [`Registration`] can never remove
/// the registration that superseded it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Registration {
    pub(crate) id: SubscriberId,
    pub(crate) token: u64,
}

impl Registration {
    #[must_use]
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Receive half of a subscriber's bounded mailbox.
///
/// Owned by the delivery side. Yields events in enqueue order and returns
/// `None` once the hub has closed the mailbox (unregister, re-register or
/// drain) and every queued event has been taken.
#[derive(Debug)]
pub struct Mailbox {
    registration: Registration,
    capacity: usize,
    receiver: mpsc::Receiver<Arc<LocationEvent>>,
}

impl Mailbox {
    pub(crate) fn new(
        registration: Registration,
        capacity: usize,
        receiver: mpsc::Receiver<Arc<LocationEvent>>,
    ) -> Self {
        Self {
            registration,
            capacity,
            receiver,
        }
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<Arc<LocationEvent>> {
        self.receiver.recv().await
    }

    /// Take the next event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError::Empty`] when nothing is queued and
    /// [`TryRecvError::Disconnected`] once the mailbox is closed and drained.
    pub fn try_recv(&mut self) -> Result<Arc<LocationEvent>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Take every event currently queued.
    pub fn drain(&mut self) -> Vec<Arc<LocationEvent>> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[must_use]
    pub fn id(&self) -> &SubscriberId {
        &self.registration.id
    }

    #[must_use]
    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = SubscriberId::generate();
        let b = SubscriberId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("session_"));
    }

    #[test]
    fn test_id_conversions() {
        let id: SubscriberId = "customer-1".into();
        assert_eq!(id.as_str(), "customer-1");
        assert_eq!(id.to_string(), "customer-1");
        assert_eq!(id, SubscriberId::from(String::from("customer-1")));
    }
}
