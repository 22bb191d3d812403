//! Read models shared by the HTTP API and the realtime channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::action::Action;
use super::conversation::{AwaitingRole, ChatStatus, ConversationRecord, FlowState};
use super::message::{Message, MessageBody, MessageType};
use super::money::Minor;
use super::user::UserSummary;
use super::{ConversationId, MessageId, UserId};

/// Message as clients see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MessageView {
    /// Message id.
    #[schema(value_type = uuid::Uuid)]
    pub id: MessageId,
    /// Conversation id.
    #[schema(value_type = uuid::Uuid)]
    pub conversation_id: ConversationId,
    /// Sender; the nil UUID for system notices.
    #[schema(value_type = uuid::Uuid)]
    pub sender_id: UserId,
    /// Receiver.
    #[schema(value_type = uuid::Uuid)]
    pub receiver_id: UserId,
    /// Origin.
    pub message_type: MessageType,
    /// Text content, for text bodies.
    pub content: Option<String>,
    /// Structured action, for automated messages.
    #[schema(value_type = Option<Object>)]
    pub action: Option<Action>,
    /// Whether the receiver has seen it.
    pub seen: bool,
    /// Server timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        let (content, action) = match &message.body {
            MessageBody::Text { text } => (Some(text.clone()), None),
            MessageBody::Action(action) => (None, Some(action.clone())),
        };
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            message_type: message.message_type,
            content,
            action,
            seen: message.seen,
            created_at: message.created_at,
        }
    }
}

/// Last message shown in a conversation list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MessageSummary {
    /// Message id.
    #[schema(value_type = uuid::Uuid)]
    pub id: MessageId,
    /// Sender.
    #[schema(value_type = uuid::Uuid)]
    pub sender_id: UserId,
    /// Origin.
    pub message_type: MessageType,
    /// One-line preview.
    pub preview: String,
    /// Server timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessageSummary {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id,
            message_type: message.message_type,
            preview: message.body.preview(),
            created_at: message.created_at,
        }
    }
}

/// A conversation from one participant's point of view. This is both the
/// list entry and the `conversations:upsert` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConversationView {
    /// Conversation id.
    #[schema(value_type = uuid::Uuid)]
    pub conversation_id: ConversationId,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// Coarse status.
    pub chat_status: ChatStatus,
    /// State machine position.
    pub flow_state: FlowState,
    /// Participant the conversation waits for.
    pub awaiting_role: AwaitingRole,
    /// Counter-offer rounds used.
    pub negotiation_round: u32,
    /// Agreed price once fixed.
    pub final_agreed_amount: Option<Minor>,
    /// Amount currently on the table.
    pub pending_offer: Option<Minor>,
    /// Concurrency version; clients drop upserts older than what they hold.
    pub version: u64,
    /// Unseen messages addressed to the viewer.
    pub unread_count: u64,
    /// Most recent message.
    pub last_message: Option<MessageSummary>,
    /// The other participant.
    pub other_user: UserSummary,
}

impl ConversationView {
    /// Builds the view for `viewer`.
    #[must_use]
    pub fn for_user(
        record: &ConversationRecord,
        viewer: UserId,
        unread_count: u64,
        last_message: Option<&Message>,
    ) -> Self {
        let conv = &record.conversation;
        Self {
            conversation_id: conv.id,
            updated_at: conv.updated_at,
            chat_status: conv.chat_status,
            flow_state: conv.flow_state,
            awaiting_role: conv.awaiting_role,
            negotiation_round: conv.negotiation_round,
            final_agreed_amount: conv.final_agreed_amount,
            pending_offer: conv.pending_offer,
            version: conv.version,
            unread_count,
            last_message: last_message.map(MessageSummary::from),
            other_user: UserSummary::from(record.other_user(viewer)),
        }
    }
}
