use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Fire-and-forget fan-out of committed changes, per room and globally.
/// The notification dispatcher subscribes here; senders never wait on it.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    all: broadcast::Sender<(Ulid, Event)>,
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
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to notifications for a room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Every room's events, tagged with the room id.
    pub fn subscribe_all(&self) -> broadcast::Receiver<(Ulid, Event)> {
        self.all.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, room_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&room_id) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send((room_id, event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);
        let mut all = hub.subscribe_all();

        let event = Event::Committed { actor: Some("admin".into()), ops: vec![] };
        hub.send(rid, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(all.recv().await.unwrap(), (rid, event));
    }

    #[tokio::test]
    async fn other_rooms_not_delivered() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(Ulid::new());
        hub.send(Ulid::new(), &Event::Committed { actor: None, ops: vec![] });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(Ulid::new(), &Event::Committed { actor: None, ops: vec![] });
    }
}
