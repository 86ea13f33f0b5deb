//! Event system for async link notifications.
//!
//! The link engine publishes lifecycle changes and decoded telemetry here;
//! device dispatch and diagnostics subscribe.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::types::{LinkStatus, RadioFrame};

/// Event types that can be dispatched.
#[derive(Debug, Clone)]
pub enum Event {
    /// The engine is about to open the transport.
    Starting,
    /// Transport opened, waiting for the transceiver to identify itself.
    Opened(LinkStatus),
    /// The link became active or inactive.
    ActiveChanged(LinkStatus),
    /// A transport error occurred, a restart follows.
    Error { message: String, status: LinkStatus },
    /// The transport was closed.
    Closed(LinkStatus),
    /// The engine stopped (restart pending or final).
    Stopped(LinkStatus),
    /// Device data or debug output received.
    Telemetry(RadioFrame),
}

impl Event {
    /// Returns the status snapshot carried by lifecycle events.
    #[must_use]
    pub const fn status(&self) -> Option<&LinkStatus> {
        match self {
            Self::Opened(status)
            | Self::ActiveChanged(status)
            | Self::Error { status, .. }
            | Self::Closed(status)
            | Self::Stopped(status) => Some(status),
            Self::Starting | Self::Telemetry(_) => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("event subscriber lagged, {skipped} events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // no receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }
}
