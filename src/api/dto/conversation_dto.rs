//! Conversation and message DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::CheckoutResponse;
use crate::domain::view::{ConversationView, MessageView};
use crate::error::GatewayError;
use crate::service::MessageInput;

/// Request body for `POST /conversations`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OpenDirectRequest {
    /// The other participant.
    pub user_id: Uuid,
}

/// A conversation that was opened or already existed.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OpenConversationResponse {
    /// The caller's view of it.
    pub conversation: ConversationView,
    /// `false` when an existing conversation was returned.
    pub created: bool,
}

/// One page of the conversation list.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConversationListResponse {
    /// Entries, most recently updated first.
    pub data: Vec<ConversationView>,
    /// Pass as `cursor` to get the next page; absent on the last page.
    pub next_cursor: Option<DateTime<Utc>>,
}

/// One page of history.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageListResponse {
    /// Messages, oldest first.
    pub data: Vec<MessageView>,
}

/// Request body for `POST /conversations/{id}/messages`.
///
/// Either `content` (free text in `real_time`) or `action_response`
/// (`{"action": "negotiate_price", "amount": 700000}`).
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    /// Free text.
    pub content: Option<String>,
    /// Structured response to the current action.
    #[schema(value_type = Option<Object>)]
    pub action_response: Option<serde_json::Value>,
}

impl SendMessageRequest {
    /// Normalizes the body.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] when neither field is usable or the
    /// action response has no `action`.
    pub fn into_input(self) -> Result<MessageInput, GatewayError> {
        if let Some(response) = self.action_response {
            let action = response
                .get("action")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| {
                    GatewayError::InvalidRequest("action_response.action is required".to_string())
                })?
                .to_string();
            return Ok(MessageInput::Action {
                action,
                payload: Some(response),
            });
        }
        match self.content {
            Some(text) if !text.trim().is_empty() => Ok(MessageInput::Text(text)),
            _ => Err(GatewayError::InvalidRequest(
                "content or action_response is required".to_string(),
            )),
        }
    }
}

/// Request body for `POST /conversations/{id}/button-click`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ButtonClickRequest {
    /// Id of a button rendered in the current action.
    pub button_id: String,
    /// Field values the button needs (`amount`, `note`, `attachments`).
    #[schema(value_type = Option<Object>)]
    pub payload: Option<serde_json::Value>,
    /// Accepted from older clients and ignored; the command comes from
    /// `button_id` alone.
    #[schema(value_type = Option<Object>)]
    pub additional_data: Option<serde_json::Value>,
}

impl ButtonClickRequest {
    /// The payload to read fields from.
    #[must_use]
    pub const fn fields(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }
}

/// Result of a command.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CommandResponse {
    /// The caller's view after the command.
    pub conversation: ConversationView,
    /// Messages the command appended.
    pub messages: Vec<MessageView>,
    /// Set when the click started a checkout instead of a transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<CheckoutResponse>,
}

/// Result of `POST /conversations/{id}/seen`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SeenResponse {
    /// Messages flipped to seen.
    pub message_ids: Vec<Uuid>,
}
