//! Push streams for graph observers.
//!
//! Each subscriber owns a bounded channel. Publishing copies the sender list
//! out of the registry and sends with `try_send`, so a slow subscriber loses
//! events instead of blocking the producer or other subscribers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{GraphResult, StreamError};

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of subscribers for one kind of event.
pub(crate) struct Broadcaster<T> {
    topic: &'static str,
    capacity: usize,
    subscribers: Mutex<HashMap<SubscriptionId, Sender<T>>>,
    dropped: AtomicU64,
}

impl<T: Clone> Broadcaster<T> {
    pub(crate) fn new(topic: &'static str, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            topic,
            capacity: capacity.max(1),
            subscribers: Mutex::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        })
    }

    pub(crate) fn subscribe(self: &Arc<Self>) -> Subscription<T> {
        let id = SubscriptionId::new();
        let (tx, rx) = bounded::<T>(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(self),
            unsubscribed: AtomicBool::new(false),
        }
    }

    /// Delivers `event` to every current subscriber.
    pub(crate) fn publish(&self, event: &T) {
        let targets: Vec<(SubscriptionId, Sender<T>)> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut disconnected = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(topic = self.topic, subscription = %id, "subscriber is full, event dropped");
                }
                Err(TrySendError::Disconnected(_)) => disconnected.push(id),
            }
        }

        if !disconnected.is_empty() {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            for id in disconnected {
                subscribers.remove(&id);
            }
        }
    }
}

impl<T> Broadcaster<T> {
    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A subscriber's handle on a stream.
///
/// Dropping the handle unsubscribes. Once the producing graph is gone the
/// stream reports `StreamError::Disconnected` after draining buffered events.
pub struct Subscription<T> {
    id: SubscriptionId,
    rx: Receiver<T>,
    registry: Weak<Broadcaster<T>>,
    unsubscribed: AtomicBool,
}

impl<T> Subscription<T> {
    /// The subscription id backing this stream.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stops delivery to this subscription. Idempotent.
    ///
    /// Events already buffered can still be received.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }

    /// Receives the next event (blocking).
    pub fn recv(&self) -> GraphResult<T> {
        self.rx.recv().map_err(|_| StreamError::Disconnected.into())
    }

    /// Receives the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> GraphResult<T> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => StreamError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into(),
            RecvTimeoutError::Disconnected => StreamError::Disconnected.into(),
        })
    }

    /// Receives a buffered event without blocking.
    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drains every buffered event.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("buffered", &self.rx.len())
            .finish()
    }
}
