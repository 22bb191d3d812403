//! WebSocket message types: envelope, commands, and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::chat_event::ChatEvent;
use crate::error::GatewayError;

/// Top-level WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    /// Client-provided ID for requests; server-generated for events.
    #[serde(default)]
    pub id: String,
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: WsMessageType,
    /// ISO-8601 timestamp.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Variant-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WsMessage {
    /// A server-pushed event.
    #[must_use]
    pub fn event(event: &ChatEvent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            msg_type: WsMessageType::Event,
            timestamp: Utc::now(),
            payload: serde_json::to_value(event).unwrap_or_default(),
        }
    }

    /// The answer to command `id`.
    #[must_use]
    pub fn response(id: String, payload: serde_json::Value) -> Self {
        Self {
            id,
            msg_type: WsMessageType::Response,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// The failure of command `id`, with the same body as HTTP errors.
    #[must_use]
    pub fn error(id: String, err: &GatewayError) -> Self {
        Self {
            id,
            msg_type: WsMessageType::Error,
            timestamp: Utc::now(),
            payload: serde_json::to_value(err.body()).unwrap_or_default(),
        }
    }

    /// Serializes the envelope for the wire.
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Discriminator for WebSocket message types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    /// Client → Server command.
    Command,
    /// Server → Client response to a command.
    Response,
    /// Server → Client pushed event.
    Event,
    /// Server → Client error.
    Error,
}

/// Commands that a client can send over WebSocket. They mirror the HTTP
/// command endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WsCommand {
    /// Same as `POST /conversations/{id}/messages`.
    SendMessage {
        /// Target conversation.
        conversation_id: Uuid,
        /// Free text.
        #[serde(default)]
        content: Option<String>,
        /// Structured response to the current action.
        #[serde(default)]
        action_response: Option<serde_json::Value>,
    },
    /// Same as `POST /conversations/{id}/button-click`.
    ButtonClick {
        /// Target conversation.
        conversation_id: Uuid,
        /// Id of a rendered button.
        button_id: String,
        /// Field values. Other keys, `additional_data` included, are
        /// ignored.
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },
    /// Same as `POST /conversations/{id}/seen`.
    MarkSeen {
        /// Target conversation.
        conversation_id: Uuid,
    },
    /// Liveness probe; answered with `pong`.
    Ping,
}
