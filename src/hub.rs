//! Fans decoded events out to every subscriber.
//!
//! Each subscriber has its own bounded queue.
//! Publishing never waits: a subscriber whose queue is full or closed
//! is removed on the spot, and nobody else notices.

use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::events::TelemetryEvent;

/// Identifies a subscriber for its registered lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(Uuid);

impl Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Registered {
    name: String,
    sender: mpsc::Sender<TelemetryEvent>,
}

type Registry = HashMap<SubscriberId, Registered>;

/// The registry of subscribers.
/// Clones share the registry.
#[derive(Clone)]
pub struct Hub {
    registry: Arc<Mutex<Registry>>,
    capacity: usize,
}

impl Hub {
    /// A hub where each subscriber may have `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a subscriber.
    /// It gets every event published from now on, and none from before.
    pub fn register(&self, name: &str) -> Subscriber {
        let id = SubscriberId(Uuid::new_v4());
        let (sender, receiver) = mpsc::channel(self.capacity);

        let count = {
            let mut registry = self.registry();
            registry.insert(
                id,
                Registered {
                    name: name.to_owned(),
                    sender,
                },
            );
            registry.len()
        };

        info!(%name, %id, %count, "Subscriber registered");

        Subscriber {
            id,
            events: receiver,
            hub: self.clone(),
        }
    }

    /// Remove a subscriber.
    /// Returns false if it was not registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        match self.registry().remove(&id) {
            Some(removed) => {
                info!(name = %removed.name, %id, "Subscriber unregistered");
                true
            }
            None => false,
        }
    }

    /// True if the subscriber is still registered.
    pub fn is_registered(&self, id: SubscriberId) -> bool {
        self.registry().contains_key(&id)
    }

    /// How many subscribers are registered.
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    /// True if there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer the event to every subscriber.
    ///
    /// Returns how many subscribers it was queued for.
    pub fn publish(&self, event: TelemetryEvent) -> usize {
        let mut registry = self.registry();
        let mut delivered = 0;

        registry.retain(|id, subscriber| match subscriber.sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                info!(name = %subscriber.name, %id, "Subscriber too slow, dropping it");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(name = %subscriber.name, %id, "Subscriber gone, dropping it");
                false
            }
        });

        trace!(%delivered, "Published {event}");

        delivered
    }

    /// Remove every subscriber.
    /// Their queues end once drained.
    pub fn close(&self) {
        let mut registry = self.registry();
        if !registry.is_empty() {
            info!(count = registry.len(), "Closing all subscribers");
        }
        registry.clear();
    }
}

/// A delivery endpoint for one client.
///
/// Dropping it unregisters it.
pub struct Subscriber {
    id: SubscriberId,
    events: mpsc::Receiver<TelemetryEvent>,
    hub: Hub,
}

impl Subscriber {
    /// This subscriber's id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// True while the hub still delivers to us.
    pub fn is_live(&self) -> bool {
        self.hub.is_registered(self.id)
    }

    /// The next event.
    ///
    /// `None` once the subscriber has been removed and its queue is drained.
    pub async fn next(&mut self) -> Option<TelemetryEvent> {
        self.events.recv().await
    }

    /// The next event, if one is queued.
    pub fn try_next(&mut self) -> Option<TelemetryEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}
