//! Post-commit fan-out.
//!
//! The chat service enqueues a [`CommitNotice`] on the [`Outbox`] after
//! every committed write. The [`FanoutDispatcher`] drains the outbox on its
//! own task and publishes per-user events to the [`EventBus`], in version
//! order per conversation. A notice that arrives ahead of its predecessor
//! waits in a small buffer until the gap closes. The cursor of a
//! conversation is dropped once its closing notice has gone out.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::chat_event::{ChatEvent, UnreadAction};
use crate::domain::conversation::{Conversation, ConversationRecord, FlowState};
use crate::domain::message::Message;
use crate::domain::view::{ConversationView, MessageView};
use crate::domain::{ConversationId, EventBus, UserId};
use crate::store::ChatStore;

/// Buffered notices per conversation before the dispatcher stops waiting
/// for a missing version.
const MAX_PENDING: usize = 64;

/// Tracked conversations before idle cursors are forgotten.
const MAX_CURSORS: usize = 4096;

/// One committed write.
#[derive(Debug, Clone)]
pub struct CommitNotice {
    /// Conversation as committed.
    pub conversation: Conversation,
    /// Messages the write appended.
    pub messages: Vec<Message>,
}

impl CommitNotice {
    /// Version the write produced.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.conversation.version
    }
}

/// Sending half of the fan-out queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::UnboundedSender<CommitNotice>,
}

impl Outbox {
    /// Queues a notice. Never blocks.
    pub fn enqueue(&self, notice: CommitNotice) {
        let conversation_id = notice.conversation.id;
        if self.sender.send(notice).is_err() {
            tracing::warn!(%conversation_id, "fan-out dispatcher stopped, notice dropped");
        }
    }
}

#[derive(Debug, Default)]
struct Cursor {
    next: u64,
    pending: BTreeMap<u64, CommitNotice>,
}

/// Publishes committed writes to user rooms.
#[derive(Debug)]
pub struct FanoutDispatcher {
    store: Arc<dyn ChatStore>,
    bus: EventBus,
    cursors: HashMap<ConversationId, Cursor>,
}

impl FanoutDispatcher {
    /// Creates a dispatcher that is driven manually through
    /// [`Self::accept`].
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            cursors: HashMap::new(),
        }
    }

    /// Starts a dispatcher on its own task and returns the outbox feeding
    /// it. The task ends when every [`Outbox`] clone is dropped.
    pub fn spawn(store: Arc<dyn ChatStore>, bus: EventBus) -> (Outbox, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut dispatcher = Self::new(store, bus);
        let handle = tokio::spawn(async move {
            while let Some(notice) = receiver.recv().await {
                dispatcher.accept(notice).await;
            }
            tracing::debug!("outbox closed, fan-out dispatcher exiting");
        });
        (Outbox { sender }, handle)
    }

    /// Handles one notice, publishing it and any buffered successors that
    /// are now in order.
    pub async fn accept(&mut self, notice: CommitNotice) {
        let id = notice.conversation.id;
        let version = notice.version();
        let cursor = self.cursors.entry(id).or_insert_with(|| Cursor {
            next: version,
            pending: BTreeMap::new(),
        });

        if version < cursor.next {
            // A newer state already went out; only the messages are news.
            tracing::debug!(conversation_id = %id, version, next = cursor.next, "late commit notice");
            self.publish(&notice, false).await;
            return;
        }
        cursor.pending.insert(version, notice);
        if cursor.pending.len() > MAX_PENDING
            && let Some(first) = cursor.pending.keys().next().copied()
        {
            tracing::warn!(conversation_id = %id, missing = cursor.next, resume = first, "skipping fan-out gap");
            cursor.next = first;
        }

        let mut closed = false;
        loop {
            let ready = match self.cursors.get_mut(&id) {
                Some(cursor) => match cursor.pending.remove(&cursor.next) {
                    Some(notice) => {
                        cursor.next = cursor.next.saturating_add(1);
                        notice
                    }
                    None => break,
                },
                None => break,
            };
            closed = ready.conversation.flow_state == FlowState::Closed;
            self.publish(&ready, true).await;
        }
        self.evict(id, closed);
    }

    /// Drops the cursor of a closed conversation once nothing is buffered,
    /// and forgets idle cursors when too many are tracked.
    fn evict(&mut self, id: ConversationId, closed: bool) {
        if closed && self.cursors.get(&id).is_some_and(|c| c.pending.is_empty()) {
            self.cursors.remove(&id);
        }
        if self.cursors.len() > MAX_CURSORS {
            let before = self.cursors.len();
            self.cursors.retain(|_, cursor| !cursor.pending.is_empty());
            tracing::debug!(before, after = self.cursors.len(), "idle fan-out cursors dropped");
        }
    }

    async fn publish(&self, notice: &CommitNotice, with_upsert: bool) {
        let conversation = &notice.conversation;
        let record = match self.store.load(conversation.id).await {
            Ok(stored) => ConversationRecord {
                conversation: conversation.clone(),
                brand_owner: stored.brand_owner,
                influencer: stored.influencer,
            },
            Err(e) => {
                tracing::warn!(conversation_id = %conversation.id, error = %e, "fan-out load failed");
                return;
            }
        };
        let last = match notice.messages.last() {
            Some(message) => Some(message.clone()),
            None => self.store.last_message(conversation.id).await.unwrap_or_else(|e| {
                tracing::warn!(conversation_id = %conversation.id, error = %e, "fan-out last message failed");
                None
            }),
        };

        for participant in conversation.participants() {
            let unread = self.unread(conversation.id, participant).await;
            if with_upsert {
                let view = ConversationView::for_user(&record, participant, unread, last.as_ref());
                self.send(participant, ChatEvent::ConversationUpsert { conversation: view });
            }
            for message in &notice.messages {
                self.send(
                    participant,
                    ChatEvent::MessageNew {
                        message: MessageView::from(message),
                    },
                );
            }
            let inbound = notice
                .messages
                .iter()
                .any(|m| m.receiver_id == participant && !m.seen);
            if inbound {
                self.send(
                    participant,
                    ChatEvent::UnreadCountUpdated {
                        conversation_id: conversation.id,
                        unread_count: unread,
                        action: UnreadAction::Increment,
                    },
                );
            }
        }
    }

    async fn unread(&self, conversation_id: ConversationId, user: UserId) -> u64 {
        self.store
            .unread_count(conversation_id, user)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(%conversation_id, error = %e, "unread count failed");
                0
            })
    }

    fn send(&self, user: UserId, event: ChatEvent) {
        let name = event.name();
        if self.bus.publish_to(user, event) == 0 {
            tracing::trace!(user_id = %user, event = name, "no subscribers");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::chat_event::RoomEvent;
    use crate::domain::conversation::Binding;
    use crate::domain::message::{MessageBody, MessageType, NewMessage};
    use crate::domain::user::{Role, User};
    use crate::store::{MemoryStore, NewConversation};

    async fn fixture() -> (Arc<MemoryStore>, Conversation, User, User) {
        let store = Arc::new(MemoryStore::new());
        let brand = User::new(Role::BrandOwner, "Acme");
        let influencer = User::new(Role::Influencer, "Asha");
        for user in [&brand, &influencer] {
            let Ok(()) = store.upsert_user(user).await else {
                panic!("user insert");
            };
        }
        let Ok(conversation) = Conversation::new(
            brand.id,
            influencer.id,
            Binding::Direct,
            None,
            FlowState::RealTime,
        ) else {
            panic!("valid conversation");
        };
        let Ok(opened) = store
            .create_conversation(NewConversation {
                conversation,
                opening: None,
            })
            .await
        else {
            panic!("open");
        };
        (store, opened.record.conversation, brand, influencer)
    }

    fn at_version(conversation: &Conversation, version: u64) -> CommitNotice {
        CommitNotice {
            conversation: Conversation {
                version,
                ..conversation.clone()
            },
            messages: Vec::new(),
        }
    }

    fn upsert_versions(events: &[RoomEvent], user: UserId) -> Vec<u64> {
        events
            .iter()
            .filter(|e| e.room == user)
            .filter_map(|e| match &e.event {
                ChatEvent::ConversationUpsert { conversation } => Some(conversation.version),
                _ => None,
            })
            .collect()
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<RoomEvent>) -> Vec<RoomEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn out_of_order_notices_are_emitted_in_version_order() {
        let (store, conversation, brand, _) = fixture().await;
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut dispatcher = FanoutDispatcher::new(store, bus);

        dispatcher.accept(at_version(&conversation, 0)).await;
        dispatcher.accept(at_version(&conversation, 2)).await;
        assert_eq!(upsert_versions(&drain(&mut rx), brand.id), vec![0]);

        dispatcher.accept(at_version(&conversation, 1)).await;
        assert_eq!(upsert_versions(&drain(&mut rx), brand.id), vec![1, 2]);
    }

    #[tokio::test]
    async fn late_notice_still_delivers_its_messages() {
        let (store, conversation, brand, influencer) = fixture().await;
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut dispatcher = FanoutDispatcher::new(Arc::clone(&store) as Arc<dyn ChatStore>, bus);

        dispatcher.accept(at_version(&conversation, 3)).await;
        drain(&mut rx);

        let message = NewMessage::new(
            brand.id,
            influencer.id,
            MessageBody::text("late"),
            MessageType::UserInput,
        )
        .into_message(conversation.id, chrono::Utc::now());
        let mut late = at_version(&conversation, 2);
        late.messages.push(message);
        dispatcher.accept(late).await;

        let events = drain(&mut rx);
        assert!(upsert_versions(&events, brand.id).is_empty());
        assert!(
            events
                .iter()
                .any(|e| e.room == influencer.id && matches!(e.event, ChatEvent::MessageNew { .. }))
        );
        assert!(events.iter().any(|e| e.room == influencer.id
            && matches!(
                e.event,
                ChatEvent::UnreadCountUpdated {
                    action: UnreadAction::Increment,
                    ..
                }
            )));
    }

    #[tokio::test]
    async fn closing_notice_releases_the_cursor() {
        let (store, conversation, brand, _) = fixture().await;
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut dispatcher = FanoutDispatcher::new(store, bus);

        dispatcher.accept(at_version(&conversation, 0)).await;
        assert_eq!(dispatcher.cursors.len(), 1);

        let mut closing = at_version(&conversation, 2);
        closing.conversation.flow_state = FlowState::Closed;
        dispatcher.accept(closing).await;
        assert_eq!(dispatcher.cursors.len(), 1, "closing notice still waits for version 1");

        dispatcher.accept(at_version(&conversation, 1)).await;
        assert!(dispatcher.cursors.is_empty());
        assert_eq!(upsert_versions(&drain(&mut rx), brand.id), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn idle_cursors_are_forgotten_past_the_cap() {
        let (store, conversation, _, _) = fixture().await;
        let bus = EventBus::new(64);
        let mut dispatcher = FanoutDispatcher::new(store, bus);
        for _ in 0..MAX_CURSORS {
            dispatcher.cursors.insert(ConversationId::new(), Cursor::default());
        }
        let mut waiting = Cursor::default();
        waiting.pending.insert(1, at_version(&conversation, 1));
        let held = ConversationId::new();
        dispatcher.cursors.insert(held, waiting);

        dispatcher.accept(at_version(&conversation, 0)).await;
        assert_eq!(dispatcher.cursors.len(), 1);
        assert!(dispatcher.cursors.contains_key(&held));
    }

    #[tokio::test]
    async fn both_participants_get_their_own_view() {
        let (store, conversation, brand, influencer) = fixture().await;
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut dispatcher = FanoutDispatcher::new(store, bus);
        dispatcher.accept(at_version(&conversation, 0)).await;

        let events = drain(&mut rx);
        let others: Vec<(UserId, UserId)> = events
            .iter()
            .filter_map(|e| match &e.event {
                ChatEvent::ConversationUpsert { conversation } => {
                    Some((e.room, conversation.other_user.id))
                }
                _ => None,
            })
            .collect();
        assert_eq!(others, vec![(brand.id, influencer.id), (influencer.id, brand.id)]);
    }
}
