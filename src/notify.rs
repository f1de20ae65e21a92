use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::QueueEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for queue changes, one channel per clinic.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<QueueEvent>>,
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

    /// Subscribe to a clinic's queue. Creates the channel if needed.
    pub fn subscribe(&self, clinic_id: Ulid) -> broadcast::Receiver<QueueEvent> {
        let sender = self
            .channels
            .entry(clinic_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, clinic_id: Ulid, event: &QueueEvent) {
        if let Some(sender) = self.channels.get(&clinic_id) {
            let _ = sender.send(event.clone());
        }
    }
}
