//! The fan-out hub.
//!
//! [`Hub`] ties the [`Registry`] to the broadcast engine and carries the
//! Running → Draining → Drained lifecycle. It is fully synchronous: nothing
//! in here awaits, so a slow subscriber can only ever cost one failed
//! `try_send`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::broadcast::{fan_out, BroadcastReport, OverflowPolicy};
use crate::registry::{Registry, Subscription};
use crate::subscriber::{Mailbox, Registration, SubscriberId};
use crate::LocationEvent;

/// Default mailbox capacity per subscriber.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub is draining and accepts no new subscribers.
    #[error("Hub is draining")]
    Draining,

    /// The hub has been drained.
    #[error("Hub is closed")]
    Closed,

    /// Mailbox capacity is zero or larger than a bounded channel can hold.
    #[error("Mailbox capacity must be between 1 and {}", tokio::sync::Semaphore::MAX_PERMITS)]
    InvalidCapacity,
}

/// Hub lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubState {
    /// Accepting register, unregister and broadcast.
    Running,
    /// Rejecting register; unregister and broadcast still serviced.
    Draining,
    /// Every mailbox has been closed.
    Drained,
}

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Mailbox capacity used by [`Hub::register`].
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Policy applied when a mailbox is full.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

fn default_mailbox_capacity() -> usize {
    DEFAULT_MAILBOX_CAPACITY
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

#[derive(Default)]
struct Counters {
    registrations: AtomicU64,
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    dropped_full: AtomicU64,
    dropped_closed: AtomicU64,
    evicted: AtomicU64,
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Successful registrations since start.
    pub registrations_total: u64,
    /// Events broadcast since start.
    pub broadcasts_total: u64,
    /// Mailbox enqueues since start.
    pub delivered_total: u64,
    /// Per-subscriber drops because of a full mailbox.
    pub dropped_full_total: u64,
    /// Per-subscriber drops because of a closed mailbox.
    pub dropped_closed_total: u64,
    /// Subscribers removed by the broadcast engine.
    pub evicted_total: u64,
}

/// The real-time fan-out hub.
///
/// Share it as `Arc<Hub>` between the log consumer loop and every delivery
/// gateway.
pub struct Hub {
    registry: Registry,
    config: HubConfig,
    counters: Counters,
}

impl Hub {
    /// Create a new hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a new hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            registry: Registry::new(),
            config,
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register `id` with the configured mailbox capacity.
    ///
    /// Any existing registration for `id` is closed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is draining or drained.
    pub fn register(&self, id: impl Into<SubscriberId>) -> Result<Mailbox, HubError> {
        self.register_with_capacity(id, self.config.mailbox_capacity)
    }

    /// Register `id` with an explicit mailbox capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not running or `capacity` is zero.
    pub fn register_with_capacity(
        &self,
        id: impl Into<SubscriberId>,
        capacity: usize,
    ) -> Result<Mailbox, HubError> {
        let (mailbox, previous) = self.registry.register(id.into(), capacity)?;
        drop(previous);
        self.counters.registrations.fetch_add(1, Ordering::Relaxed);
        Ok(mailbox)
    }

    /// Remove and close the mailbox for `id`. A no-op if `id` is absent.
    ///
    /// Returns `true` if a registration was removed.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.registry.remove(id);
        if removed.is_some() {
            debug!(subscriber = %id, "Subscriber unregistered");
        }
        removed.is_some()
    }

    /// Remove `registration` if it is still current for its id.
    ///
    /// Gateways use this on exit so a superseded session cannot remove the
    /// registration that replaced it.
    pub fn unregister_registration(&self, registration: &Registration) -> bool {
        let removed = self.registry.remove_registration(registration);
        if removed.is_some() {
            debug!(subscriber = %registration.id(), "Subscriber unregistered");
        }
        removed.is_some()
    }

    /// Point-in-time copy of the registered set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.registry.snapshot()
    }

    /// Offer `event` to every registered subscriber.
    ///
    /// Never blocks on a subscriber and never fails: full and closed mailboxes
    /// are counted in the returned report.
    pub fn broadcast(&self, event: LocationEvent) -> BroadcastReport {
        let event = Arc::new(event);
        let snapshot = self.registry.snapshot();
        let (mut report, evict) = fan_out(&snapshot, &event, self.config.overflow_policy);
        drop(snapshot);

        for registration in &evict {
            if self.registry.remove_registration(registration).is_some() {
                report.evicted += 1;
                debug!(subscriber = %registration.id(), "Subscriber evicted");
            }
        }

        self.record(&report);
        trace!(
            source = %event.source_id(),
            attempted = report.attempted,
            delivered = report.delivered,
            dropped = report.dropped(),
            "Broadcast event"
        );
        report
    }

    /// Entry point for the durable log consumer: one call per record, in log order.
    pub fn on_event(&self, event: LocationEvent) -> BroadcastReport {
        self.broadcast(event)
    }

    /// Stop accepting registrations. Returns `false` if already draining or drained.
    pub fn begin_drain(&self) -> bool {
        let started = self.registry.begin_drain();
        if started {
            info!(subscribers = self.registry.len(), "Hub draining");
        }
        started
    }

    /// Close every remaining mailbox and enter Drained.
    ///
    /// Returns the number of mailboxes closed.
    pub fn finish_drain(&self) -> usize {
        let remaining = self.registry.close_all();
        let closed = remaining.len();
        drop(remaining);
        info!(closed, "Hub drained");
        closed
    }

    #[must_use]
    pub fn state(&self) -> HubState {
        self.registry.state()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == HubState::Running
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            subscribers: self.registry.len(),
            registrations_total: self.counters.registrations.load(Ordering::Relaxed),
            broadcasts_total: self.counters.broadcasts.load(Ordering::Relaxed),
            delivered_total: self.counters.delivered.load(Ordering::Relaxed),
            dropped_full_total: self.counters.dropped_full.load(Ordering::Relaxed),
            dropped_closed_total: self.counters.dropped_closed.load(Ordering::Relaxed),
            evicted_total: self.counters.evicted.load(Ordering::Relaxed),
        }
    }

    fn record(&self, report: &BroadcastReport) {
        let c = &self.counters;
        c.broadcasts.fetch_add(1, Ordering::Relaxed);
        c.delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
        c.dropped_full.fetch_add(report.dropped_full as u64, Ordering::Relaxed);
        c.dropped_closed.fetch_add(report.dropped_closed as u64, Ordering::Relaxed);
        c.evicted.fetch_add(report.evicted as u64, Ordering::Relaxed);
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
