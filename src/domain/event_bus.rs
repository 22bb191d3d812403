//! Broadcast channel for room events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. The fan-out
//! dispatcher publishes a [`RoomEvent`] per recipient, and every WebSocket
//! connection subscribes and keeps only the events for its own room.

use tokio::sync::broadcast;

use super::UserId;
use super::chat_event::{ChatEvent, RoomEvent};

/// Broadcast bus for [`RoomEvent`]s.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity
/// (default 10 000). When the ring buffer is full, the oldest events are
/// dropped for lagging receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RoomEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    /// If there are no active receivers, the event is silently dropped.
    pub fn publish(&self, event: RoomEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Publishes `event` to the room of `user`.
    pub fn publish_to(&self, user: UserId, event: ChatEvent) -> usize {
        self.publish(RoomEvent { room: user, event })
    }

    /// Creates a new receiver that will receive all future events.
    ///
    /// Each WebSocket connection should call this once on connect.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::ConversationId;
    use crate::domain::chat_event::UnreadAction;

    fn make_event(conversation_id: ConversationId) -> ChatEvent {
        ChatEvent::UnreadCountUpdated {
            conversation_id,
            unread_count: 1,
            action: UnreadAction::Increment,
        }
    }

    #[test]
    fn publish_without_receivers_returns_zero() {
        let bus = EventBus::new(100);
        let count = bus.publish_to(UserId::new(), make_event(ConversationId::new()));
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn subscriber_receives_room_event() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        let user = UserId::new();
        let id = ConversationId::new();
        bus.publish_to(user, make_event(id));

        let Ok(received) = rx.recv().await else {
            panic!("expected to receive event");
        };
        assert_eq!(received.room, user);
        assert_eq!(received.event.conversation_id(), id);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(100);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let count = bus.publish_to(UserId::new(), make_event(ConversationId::new()));
        assert_eq!(count, 2);

        let Ok(e1) = rx1.recv().await else {
            panic!("rx1 failed");
        };
        let Ok(e2) = rx2.recv().await else {
            panic!("rx2 failed");
        };
        assert_eq!(e1, e2);
    }

    #[test]
    fn receiver_count_tracks_subscribers() {
        let bus = EventBus::new(100);
        assert_eq!(bus.receiver_count(), 0);

        let rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);

        drop(rx1);
        assert_eq!(bus.receiver_count(), 1);
    }
}
