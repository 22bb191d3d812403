//! Realtime events published to user rooms.
//!
//! After every commit the fan-out dispatcher publishes one [`RoomEvent`]
//! per participant and event through the [`super::EventBus`]. WebSocket
//! connections forward the events addressed to their own user.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::view::{ConversationView, MessageView};
use super::{ConversationId, MessageId, UserId};

/// How a client should update its unread badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreadAction {
    /// A new unseen message arrived.
    Increment,
    /// The reader caught up.
    Reset,
}

/// Event payload, tagged by `event`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum ChatEvent {
    /// Conversation list entry changed.
    #[serde(rename = "conversations:upsert")]
    ConversationUpsert {
        /// The updated entry, from the recipient's point of view.
        conversation: ConversationView,
    },
    /// A message was appended.
    #[serde(rename = "message:new")]
    MessageNew {
        /// The message.
        message: MessageView,
    },
    /// Unread counter changed.
    #[serde(rename = "unread_count_updated")]
    UnreadCountUpdated {
        /// Conversation id.
        conversation_id: ConversationId,
        /// New absolute count.
        unread_count: u64,
        /// What happened.
        action: UnreadAction,
    },
    /// The receiver read messages.
    #[serde(rename = "message:seen")]
    MessageSeen {
        /// Conversation id.
        conversation_id: ConversationId,
        /// Messages flipped to seen.
        message_ids: Vec<MessageId>,
        /// Reader.
        seen_by: UserId,
        /// When.
        timestamp: DateTime<Utc>,
    },
}

impl ChatEvent {
    /// Conversation the event refers to.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        match self {
            Self::ConversationUpsert { conversation } => conversation.conversation_id,
            Self::MessageNew { message } => message.conversation_id,
            Self::UnreadCountUpdated {
                conversation_id, ..
            }
            | Self::MessageSeen {
                conversation_id, ..
            } => *conversation_id,
        }
    }

    /// Event name as sent on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConversationUpsert { .. } => "conversations:upsert",
            Self::MessageNew { .. } => "message:new",
            Self::UnreadCountUpdated { .. } => "unread_count_updated",
            Self::MessageSeen { .. } => "message:seen",
        }
    }
}

/// An event addressed to one user's room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEvent {
    /// Recipient.
    pub room: UserId,
    /// Payload.
    pub event: ChatEvent,
}

impl RoomEvent {
    /// Room name used in logs, `user_{id}`.
    #[must_use]
    pub fn room_name(&self) -> String {
        format!("user_{}", self.room)
    }
}
