//! Event broadcaster for the store change feed.
//!
//! The `EventBroadcaster` is the bus that store wrappers publish to and that
//! change-feed consumers subscribe to. It uses tokio's broadcast channel for
//! multi-producer, multi-consumer messaging.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::{ResourceEvent, StoreEvent};

/// Default buffer size for the broadcast channel.
/// Events beyond this limit will cause older events to be dropped for slow receivers.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Broadcaster for store events.
///
/// Cheap to clone; all clones share one channel.
///
/// # Example
///
/// ```
/// use octofhir_core::events::{EventBroadcaster, StoreEvent};
///
/// let broadcaster = EventBroadcaster::new();
/// let _receiver = broadcaster.subscribe();
/// assert_eq!(broadcaster.send(StoreEvent::Cleaned), 1);
/// ```
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBroadcaster {
    /// Create a new broadcaster with default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new broadcaster with custom buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new broadcaster wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns 0 if there are no active subscribers.
    pub fn send(&self, event: StoreEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    /// Send a resource event to all subscribers.
    pub fn send_resource(&self, event: ResourceEvent) -> usize {
        self.send(StoreEvent::Resource(event))
    }

    /// Subscribe to events.
    ///
    /// Events sent before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
