//! # Event Bus Server
//!
//! A [`ConnectionHandler`] keeping one subscription entry per connection:
//!
//! | Event                | Effect                                          |
//! |----------------------|-------------------------------------------------|
//! | open                 | empty entry; a second open for the same id closes the connection |
//! | `UpdateList`         | entry's action set replaced                     |
//! | `Emit`               | raw text relayed to every subscriber, sender included |
//! | malformed / unknown  | dropped                                         |
//! | close                | entry removed                                   |
//!
//! The table is a `DashMap`: an `UpdateList` replaces the set under the
//! shard write lock, so a relay never sees a half-updated entry. Relays
//! snapshot their targets and send after releasing the lock; a target that
//! closed in between drops the frame in [`Connection::send`].

use crate::envelope::{normalize_action, Envelope};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ks_03_connections::{Connection, ConnectionHandler, ConnectionId, Frame};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

struct Subscriber {
    connection: Arc<Connection>,
    actions: HashSet<String>,
}

/// Event bus counters.
#[derive(Debug, Default)]
pub struct EventBusMetrics {
    pub events_received: AtomicU64,
    pub events_relayed: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub subscription_updates: AtomicU64,
}

/// Server side of the event bus.
#[derive(Default)]
pub struct EventBusServer {
    subscribers: DashMap<ConnectionId, Subscriber>,
    metrics: EventBusMetrics,
}

impl EventBusServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relay `Emit` from application code, without a sending connection.
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, action: &str, data: Value) -> usize {
        let text = Envelope::emit(action, data).encode();
        self.relay(action, &text)
    }

    /// Sorted action names the connection is subscribed to.
    pub fn subscriptions_of(&self, id: &ConnectionId) -> Option<Vec<String>> {
        self.subscribers.get(id).map(|entry| {
            let mut actions: Vec<String> = entry.actions.iter().cloned().collect();
            actions.sort();
            actions
        })
    }

    /// Number of connections subscribed to `action`.
    pub fn subscriber_count(&self, action: &str) -> usize {
        let action = normalize_action(action);
        self.subscribers
            .iter()
            .filter(|entry| entry.actions.contains(&action))
            .count()
    }

    /// Number of tracked connections.
    pub fn connection_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn metrics(&self) -> &EventBusMetrics {
        &self.metrics
    }

    fn relay(&self, action: &str, text: &str) -> usize {
        let action = normalize_action(action);
        let targets: Vec<Arc<Connection>> = self
            .subscribers
            .iter()
            .filter(|entry| entry.actions.contains(&action))
            .map(|entry| Arc::clone(&entry.connection))
            .collect();

        let delivered = targets
            .iter()
            .filter(|connection| connection.send(Frame::text(text)))
            .count();

        self.metrics
            .events_relayed
            .fetch_add(delivered as u64, Ordering::Relaxed);
        debug!(action = %action, targets = targets.len(), delivered, "event relayed");
        delivered
    }

    fn update_subscriptions(&self, id: ConnectionId, actions: Vec<String>) {
        let actions: HashSet<String> = actions.iter().map(|a| normalize_action(a)).collect();
        match self.subscribers.get_mut(&id) {
            Some(mut entry) => {
                debug!(connection_id = %id, actions = ?actions, "subscriptions replaced");
                entry.actions = actions;
                self.metrics
                    .subscription_updates
                    .fetch_add(1, Ordering::Relaxed);
            }
            None => debug!(connection_id = %id, "update for untracked connection ignored"),
        }
    }
}

#[async_trait]
impl ConnectionHandler for EventBusServer {
    async fn on_open(&self, connection: &Arc<Connection>) {
        match self.subscribers.entry(connection.id()) {
            Entry::Occupied(_) => {
                warn!(connection_id = %connection.id(), "connection already tracked, closing");
                connection.close();
            }
            Entry::Vacant(slot) => {
                slot.insert(Subscriber {
                    connection: Arc::clone(connection),
                    actions: HashSet::new(),
                });
                debug!(connection_id = %connection.id(), "subscriber added");
            }
        }
    }

    async fn on_message(&self, connection: &Arc<Connection>, text: String) {
        self.metrics.events_received.fetch_add(1, Ordering::Relaxed);

        match Envelope::decode(&text) {
            Ok(Envelope::UpdateList(actions)) => {
                self.update_subscriptions(connection.id(), actions);
            }
            Ok(Envelope::Emit(emit)) => {
                self.relay(&emit.action_name, &text);
            }
            Err(e) => {
                self.metrics
                    .messages_dropped
                    .fetch_add(1, Ordering::Relaxed);
                debug!(connection_id = %connection.id(), error = %e, "dropping message");
            }
        }
    }

    async fn on_close(&self, connection: &Arc<Connection>) {
        if self.subscribers.remove(&connection.id()).is_some() {
            debug!(connection_id = %connection.id(), "subscriber removed");
        }
    }
}
