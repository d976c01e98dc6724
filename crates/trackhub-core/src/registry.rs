//! Subscriber registry.
//!
//! The registry owns the map from [`SubscriberId`] to [`Subscription`] and the
//! hub lifecycle state. Both live behind a single mutex whose critical sections
//! are plain map bookkeeping: the lock is never held while enqueuing onto a
//! mailbox, and mailbox senders are always dropped after it is released.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use crate::hub::{HubError, HubState};
use crate::subscriber::{Mailbox, Registration, SubscriberId};
use crate::LocationEvent;

/// Registry entry: the send half of one subscriber's mailbox.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriberId,
    token: u64,
    sender: mpsc::Sender<Arc<LocationEvent>>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    #[must_use]
    pub fn registration(&self) -> Registration {
        Registration {
            id: self.id.clone(),
            token: self.token,
        }
    }

    pub(crate) fn sender(&self) -> &mpsc::Sender<Arc<LocationEvent>> {
        &self.sender
    }
}

struct Inner {
    state: HubState,
    subscriptions: HashMap<SubscriberId, Subscription>,
}

/// The set of currently registered subscribers.
pub struct Registry {
    inner: Mutex<Inner>,
    next_token: AtomicU64,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: HubState::Running,
                subscriptions: HashMap::new(),
            }),
            next_token: AtomicU64::new(1),
        }
    }

    /// Install a new mailbox for `id`, closing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error for a capacity outside `1..=Semaphore::MAX_PERMITS`, or
    /// when the hub is not running.
    pub fn register(
        &self,
        id: SubscriberId,
        capacity: usize,
    ) -> Result<(Mailbox, Option<Subscription>), HubError> {
        if capacity == 0 || capacity > Semaphore::MAX_PERMITS {
            return Err(HubError::InvalidCapacity);
        }

        let (sender, receiver) = mpsc::channel(capacity);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let subscription = Subscription {
            id: id.clone(),
            token,
            sender,
        };

        let previous = {
            let mut inner = self.inner.lock();
            match inner.state {
                HubState::Running => {}
                HubState::Draining => return Err(HubError::Draining),
                HubState::Drained => return Err(HubError::Closed),
            }
            inner.subscriptions.insert(id.clone(), subscription)
        };

        debug!(
            subscriber = %id,
            capacity,
            replaced = previous.is_some(),
            "Subscriber registered"
        );

        let registration = Registration { id, token };
        Ok((Mailbox::new(registration, capacity, receiver), previous))
    }

    /// Remove the registration for `id`, whichever it is.
    pub fn remove(&self, id: &str) -> Option<Subscription> {
        self.inner.lock().subscriptions.remove(id)
    }

    /// Remove `registration` only if it is still the current one for its id.
    pub fn remove_registration(&self, registration: &Registration) -> Option<Subscription> {
        let mut inner = self.inner.lock();
        let current = inner.subscriptions.get(&registration.id).map(|s| s.token);
        if current == Some(registration.token) {
            inner.subscriptions.remove(&registration.id)
        } else {
            None
        }
    }

    /// Point-in-time copy of every registered subscription.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.inner.lock().subscriptions.values().cloned().collect()
    }

    /// Move from Running to Draining. Returns `false` if already past Running.
    pub fn begin_drain(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == HubState::Running {
            inner.state = HubState::Draining;
            true
        } else {
            false
        }
    }

    /// Enter Drained and hand back every remaining subscription.
    pub fn close_all(&self) -> Vec<Subscription> {
        let mut inner = self.inner.lock();
        inner.state = HubState::Drained;
        inner.subscriptions.drain().map(|(_, sub)| sub).collect()
    }

    #[must_use]
    pub fn state(&self) -> HubState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().subscriptions.contains_key(id)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
