//! Fan-out broadcaster with per-subscriber FIFO delivery.
//!
//! Each subscriber owns one bounded `tokio::sync::mpsc` channel. A broadcast
//! pushes the event into every channel with `try_send`, synchronously and
//! while holding the hub lock, so:
//!
//! - successive broadcasts reach each subscriber in the order they were made
//!   (the owning line serializes its broadcasts under its own lock);
//! - a subscriber added after a broadcast never sees that broadcast;
//! - the broadcasting thread never blocks on a slow consumer. A full queue
//!   drops the event for that subscriber only and the drop is counted.
//!
//! [`EventHub::cleanup`] closes every remaining channel exactly once by
//! dropping its sender; the hub refuses new subscribers afterwards.
//! [`EventHub::unsubscribe`] removes a single sender; the receiver side is
//! owned, and eventually dropped, by the subscriber.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::warn;

pub use tokio::sync::mpsc::error::TryRecvError;

/// Identifier of one subscription within a hub.
pub type SubscriberId = u64;

/// Default per-subscriber queue depth.
pub const DEFAULT_CAPACITY: usize = 64;

struct Subscriber<T> {
    tx: mpsc::Sender<T>,
    dropped: u64,
}

struct HubInner<T> {
    next_id: SubscriberId,
    subscribers: BTreeMap<SubscriberId, Subscriber<T>>,
    closed: bool,
    dropped: u64,
}

/// Broadcaster owning a set of subscriber channels.
pub struct EventHub<T> {
    name: String,
    capacity: usize,
    inner: Mutex<HubInner<T>>,
}

impl<T> std::fmt::Debug for EventHub<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventHub")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("subscribers", &inner.subscribers.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl<T: Clone> EventHub<T> {
    /// Hub whose subscriber queues hold up to `capacity` undelivered events.
    ///
    /// `name` only appears in log records.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            inner: Mutex::new(HubInner {
                next_id: 0,
                subscribers: BTreeMap::new(),
                closed: false,
                dropped: 0,
            }),
        }
    }

    /// Register a new subscriber. Returns `None` once the hub was cleaned up.
    pub fn subscribe(&self) -> Option<Subscription<T>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, Subscriber { tx, dropped: 0 });
        Some(Subscription { id, rx })
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.lock().subscribers.remove(&id).is_some()
    }

    /// Deliver `event` to every current subscriber.
    ///
    /// Returns how many subscribers accepted it. Subscribers whose receiver
    /// is gone are pruned.
    pub fn broadcast(&self, event: &T) -> usize {
        let mut inner = self.inner.lock();
        if inner.closed {
            return 0;
        }
        let mut delivered = 0;
        let mut gone = Vec::new();
        let mut newly_dropped = 0;
        for (id, subscriber) in inner.subscribers.iter_mut() {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    subscriber.dropped += 1;
                    newly_dropped += 1;
                    warn!(
                        hub = %self.name,
                        subscriber = id,
                        dropped = subscriber.dropped,
                        capacity = self.capacity,
                        "Subscriber queue full, event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
            }
        }
        inner.dropped += newly_dropped;
        for id in gone {
            inner.subscribers.remove(&id);
        }
        delivered
    }

    /// Close every remaining subscriber channel and refuse new subscribers.
    ///
    /// Returns the number of channels closed. Calling it again closes nothing.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let subscribers = std::mem::take(&mut inner.subscribers);
        subscribers.len()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// True after [`cleanup`](Self::cleanup).
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Events dropped because a subscriber queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Per-subscriber queue depth.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Receiving side of one hub subscription.
#[derive(Debug)]
pub struct Subscription<T> {
    id: SubscriberId,
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Identifier to pass to [`EventHub::unsubscribe`].
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event. `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next event without waiting.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }

    /// Block the current thread for the next event.
    ///
    /// Must not be called from inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<T> {
        self.rx.blocking_recv()
    }

    /// Split into the identifier and the raw receiver.
    pub fn into_parts(self) -> (SubscriberId, mpsc::Receiver<T>) {
        (self.id, self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_receives_in_order() {
        let hub = EventHub::new("test", 8);
        let mut sub = hub.subscribe().unwrap();
        for i in 0..5 {
            assert_eq!(hub.broadcast(&i), 1);
        }
        for i in 0..5 {
            assert_eq!(sub.try_recv().unwrap(), i);
        }
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_late_subscriber_sees_nothing_retroactive() {
        let hub = EventHub::new("test", 8);
        hub.broadcast(&1);
        hub.broadcast(&2);
        let mut sub = hub.subscribe().unwrap();
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Empty)));
        hub.broadcast(&3);
        assert_eq!(sub.try_recv().unwrap(), 3);
    }

    #[test]
    fn test_cleanup_closes_every_channel_once() {
        let hub = EventHub::new("test", 8);
        let mut a = hub.subscribe().unwrap();
        let mut b = hub.subscribe().unwrap();
        hub.broadcast(&7);
        assert_eq!(hub.cleanup(), 2);
        assert_eq!(hub.cleanup(), 0);
        assert!(hub.is_closed());
        assert!(hub.subscribe().is_none());
        // Buffered events drain before the close is observed.
        assert_eq!(a.try_recv().unwrap(), 7);
        assert!(matches!(a.try_recv(), Err(TryRecvError::Disconnected)));
        assert_eq!(b.try_recv().unwrap(), 7);
        assert!(matches!(b.try_recv(), Err(TryRecvError::Disconnected)));
        assert_eq!(hub.broadcast(&8), 0);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = EventHub::new("test", 8);
        let mut sub = hub.subscribe().unwrap();
        let other = hub.subscribe().unwrap();
        assert!(hub.unsubscribe(sub.id()));
        assert!(!hub.unsubscribe(sub.id()));
        assert_eq!(hub.broadcast(&1), 1);
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Disconnected)));
        drop(other);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let hub = EventHub::new("test", 2);
        let mut sub = hub.subscribe().unwrap();
        assert_eq!(hub.broadcast(&1), 1);
        assert_eq!(hub.broadcast(&2), 1);
        assert_eq!(hub.broadcast(&3), 0);
        assert_eq!(hub.dropped_events(), 1);
        assert_eq!(sub.try_recv().unwrap(), 1);
        assert_eq!(sub.try_recv().unwrap(), 2);
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let hub = EventHub::new("test", 2);
        let sub = hub.subscribe().unwrap();
        drop(sub);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.broadcast(&1), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let hub: EventHub<u8> = EventHub::new("test", 0);
        assert_eq!(hub.capacity(), 1);
    }

    #[tokio::test]
    async fn test_async_recv_sees_close() {
        let hub = EventHub::new("test", 4);
        let mut sub = hub.subscribe().unwrap();
        hub.broadcast(&"edge");
        hub.cleanup();
        assert_eq!(sub.recv().await, Some("edge"));
        assert_eq!(sub.recv().await, None);
    }
}
