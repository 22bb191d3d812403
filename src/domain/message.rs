//! Append-only chat messages.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::action::Action;
use super::{ConversationId, MessageId, UserId};
use crate::error::GatewayError;

/// Origin of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Typed by a participant.
    UserInput,
    /// Generated by the flow engine to render the next input set.
    Automated,
    /// Outcome notices sent by the platform.
    System,
}

impl MessageType {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserInput => "user_input",
            Self::Automated => "automated",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_input" => Ok(Self::UserInput),
            "automated" => Ok(Self::Automated),
            "system" => Ok(Self::System),
            other => Err(GatewayError::Internal(format!("unknown message type: {other}"))),
        }
    }
}

/// Message content: free text or a structured action component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Buttons and inputs rendering the next legal commands.
    Action(Action),
}

impl MessageBody {
    /// Convenience constructor for text bodies.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Short human-readable preview used in conversation lists.
    #[must_use]
    pub fn preview(&self) -> String {
        match self {
            Self::Text { text } => text.chars().take(120).collect(),
            Self::Action(action) => action.preview(),
        }
    }
}

/// A message waiting to be stored. The store assigns `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Pre-generated message id.
    pub id: MessageId,
    /// Sender (a participant or [`UserId::SYSTEM`]).
    pub sender_id: UserId,
    /// Receiver (always a participant).
    pub receiver_id: UserId,
    /// Content.
    pub body: MessageBody,
    /// Origin.
    pub message_type: MessageType,
}

impl NewMessage {
    /// Creates a new message with a fresh id.
    #[must_use]
    pub fn new(
        sender_id: UserId,
        receiver_id: UserId,
        body: MessageBody,
        message_type: MessageType,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender_id,
            receiver_id,
            body,
            message_type,
        }
    }

    /// Materializes the stored message.
    #[must_use]
    pub fn into_message(self, conversation_id: ConversationId, created_at: DateTime<Utc>) -> Message {
        Message {
            id: self.id,
            conversation_id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            body: self.body,
            message_type: self.message_type,
            seen: false,
            created_at,
        }
    }
}

/// A stored message. Immutable apart from the receiver's `seen` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message id.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Sender.
    pub sender_id: UserId,
    /// Receiver.
    pub receiver_id: UserId,
    /// Content.
    pub body: MessageBody,
    /// Origin.
    pub message_type: MessageType,
    /// Whether the receiver has seen it.
    pub seen: bool,
    /// Server-assigned, strictly increasing per conversation.
    pub created_at: DateTime<Utc>,
}

/// Next `created_at` for a conversation: `max(now, last + 1µs)`.
#[must_use]
pub fn next_created_at(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match last {
        Some(last) if last >= now => last + chrono::Duration::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_at_never_goes_backwards() {
        let now = Utc::now();
        let skewed = now + chrono::Duration::seconds(5);
        let next = next_created_at(now, Some(skewed));
        assert!(next > skewed);
        assert_eq!(next - skewed, chrono::Duration::microseconds(1));
    }

    #[test]
    fn created_at_uses_clock_when_ahead() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(1);
        assert_eq!(next_created_at(now, Some(earlier)), now);
        assert_eq!(next_created_at(now, None), now);
    }

    #[test]
    fn text_preview_is_truncated() {
        let body = MessageBody::text("x".repeat(500));
        assert_eq!(body.preview().len(), 120);
    }

    #[test]
    fn message_type_round_trips() {
        for t in [MessageType::UserInput, MessageType::Automated, MessageType::System] {
            assert_eq!(t.as_str().parse::<MessageType>().ok(), Some(t));
        }
    }
}
