use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for LISTEN/NOTIFY per property. Payment, messaging and
/// dashboard collaborators subscribe here instead of polling.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a property. Creates the channel if needed.
    pub fn subscribe(&self, property_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(property_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, property_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&property_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a property is removed).
    #[allow(dead_code)]
    pub fn remove(&self, property_id: &Ulid) {
        self.channels.remove(property_id);
    }
}
