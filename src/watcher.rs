//! Event consumers: channel watchers and callback listeners.
//!
//! Both are thin adapters over one [`EventHub`] subscription, so they see the
//! same events in the same order. A subscriber only sees transitions made
//! after it subscribed, and its channel closes when the line is torn down.

use crate::line::Line;
use crate::line_ref::LineRef;
use futures::Stream;
use linegate_core::error::{DriverError, DriverErrorKind, LineError, LineResult};
use linegate_core::event_hub::{EventHub, SubscriberId, Subscription, TryRecvError};
use linegate_core::types::{LineEvent, LineKey};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

/// Receiving end of a line (or controller-wide) event subscription.
///
/// A watcher created by `request_watcher` also owns the line; closing or
/// dropping it releases that ownership.
pub struct Watcher {
    key: Option<LineKey>,
    id: SubscriberId,
    rx: mpsc::Receiver<LineEvent>,
    hub: Weak<EventHub<LineEvent>>,
    owner: Option<LineRef>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("owning", &self.is_owning())
            .finish()
    }
}

impl Watcher {
    pub(crate) fn subscribe(line: &Arc<Line>, owner: Option<LineRef>) -> LineResult<Self> {
        let (id, rx) = line.subscribe()?.into_parts();
        let owning = owner.as_ref().is_some_and(LineRef::is_owning);
        debug!(line = %line.key(), subscriber = id, owning, "Watcher subscribed");
        Ok(Self {
            key: Some(line.key().clone()),
            id,
            rx,
            hub: Arc::downgrade(line.hub()),
            owner,
        })
    }

    pub(crate) fn from_hub(hub: &Arc<EventHub<LineEvent>>) -> Self {
        let (id, rx) = match hub.subscribe() {
            Some(subscription) => subscription.into_parts(),
            // Closed hub: hand out a channel whose sender is already gone.
            None => (SubscriberId::MAX, mpsc::channel(1).1),
        };
        Self {
            key: None,
            id,
            rx,
            hub: Arc::downgrade(hub),
            owner: None,
        }
    }

    /// The watched line, `None` for the controller-wide watcher.
    pub fn key(&self) -> Option<&LineKey> {
        self.key.as_ref()
    }

    /// True when closing this watcher also releases a line ownership.
    pub fn is_owning(&self) -> bool {
        self.owner.as_ref().is_some_and(LineRef::is_owning)
    }

    /// Next event. `None` once the line is gone and every queued event was
    /// received.
    pub async fn recv(&mut self) -> Option<LineEvent> {
        self.rx.recv().await
    }

    /// Next queued event without waiting.
    pub fn try_recv(&mut self) -> Result<LineEvent, TryRecvError> {
        self.rx.try_recv()
    }

    /// Block the calling thread for the next event. Not for async contexts.
    pub fn blocking_recv(&mut self) -> Option<LineEvent> {
        self.rx.blocking_recv()
    }

    /// Consume the watcher as a `Stream` of events.
    pub fn into_stream(self) -> WatcherStream {
        WatcherStream {
            inner: ReceiverStream::new(self.rx),
            _owner: self.owner,
        }
    }

    /// Unsubscribe, and release the line if this watcher owns it.
    pub fn close(self) -> LineResult<()> {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
        match self.owner {
            Some(owner) => owner.close(),
            None => Ok(()),
        }
    }
}

/// [`Watcher`] converted into a `futures::Stream`.
pub struct WatcherStream {
    inner: ReceiverStream<LineEvent>,
    _owner: Option<LineRef>,
}

impl Stream for WatcherStream {
    type Item = LineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Callback registered with [`LineRef::on_event`].
///
/// Events are handed to the callback one at a time on a dedicated thread.
pub struct Listener {
    key: LineKey,
    id: SubscriberId,
    hub: Weak<EventHub<LineEvent>>,
    thread: Option<JoinHandle<()>>,
}

impl Listener {
    pub(crate) fn spawn<F>(line: &Arc<Line>, mut callback: F) -> LineResult<Self>
    where
        F: FnMut(LineEvent) + Send + 'static,
    {
        let subscription: Subscription<LineEvent> = line.subscribe()?;
        let id = subscription.id();
        let (_, mut rx) = subscription.into_parts();
        let thread = std::thread::Builder::new()
            .name(format!("linegate-listener-{}", line.key()))
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    callback(event);
                }
            })
            .map_err(|err| {
                line.unsubscribe(id);
                spawn_error(line.key(), &err)
            })?;
        Ok(Self {
            key: line.key().clone(),
            id,
            hub: Arc::downgrade(line.hub()),
            thread: Some(thread),
        })
    }

    /// Stop delivery and wait for the callback to return.
    ///
    /// Events already queued are still delivered first.
    pub fn close(mut self) {
        self.unsubscribe();
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                error!(line = %self.key, "Listener callback panicked");
            }
        }
    }

    fn unsubscribe(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

fn spawn_error(key: &LineKey, err: &std::io::Error) -> LineError {
    error!(line = %key, error = %err, "Listener thread spawn failed");
    LineError::Driver(DriverError::new(
        "linegate",
        DriverErrorKind::Initialization,
        format!("cannot start listener thread for {}: {}", key, err),
    ))
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_failure_is_a_driver_error() {
        let key = LineKey::new("gpiochip0", 3);
        let err = std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no threads left");
        match spawn_error(&key, &err) {
            LineError::Driver(driver) => {
                assert_eq!(driver.kind, DriverErrorKind::Initialization);
                assert!(driver.to_string().contains("gpiochip0:3"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
