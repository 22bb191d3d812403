//! WebSocket connection state machine.
//!
//! Handles the read/write loop for a single WebSocket connection,
//! dispatching incoming commands and forwarding the events of the caller's
//! room.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use super::messages::{WsCommand, WsMessage, WsMessageType};
use crate::api::dto::{SeenResponse, SendMessageRequest};
use crate::app_state::AppState;
use crate::domain::chat_event::RoomEvent;
use crate::domain::{ConversationId, UserId};
use crate::error::GatewayError;

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads commands from the client and dispatches them as `user`.
/// - Forwards events published to room `user_{user}`.
pub async fn run_connection(
    socket: WebSocket,
    mut event_rx: broadcast::Receiver<RoomEvent>,
    state: AppState,
    user: UserId,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    tracing::debug!(user_id = %user, "ws connection opened");

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_text_message(&state, user, text.as_str()).await;
                        if ws_tx.send(Message::text(reply.to_text())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(room_event) => {
                        if room_event.room != user {
                            continue;
                        }
                        let msg = WsMessage::event(&room_event.event);
                        if ws_tx.send(Message::text(msg.to_text())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(user_id = %user, lagged = n, "ws client lagged behind event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!(user_id = %user, "ws connection closed");
}

/// Handles a text frame from the client and builds the reply envelope.
pub async fn handle_text_message(state: &AppState, user: UserId, text: &str) -> WsMessage {
    let Ok(msg) = serde_json::from_str::<WsMessage>(text) else {
        return WsMessage::error(
            String::new(),
            &GatewayError::InvalidRequest("malformed JSON".to_string()),
        );
    };
    if msg.msg_type != WsMessageType::Command {
        return WsMessage::error(
            msg.id,
            &GatewayError::InvalidRequest("only commands are accepted".to_string()),
        );
    }
    let command = match serde_json::from_value::<WsCommand>(msg.payload) {
        Ok(command) => command,
        Err(e) => {
            return WsMessage::error(
                msg.id,
                &GatewayError::InvalidRequest(format!("unknown command: {e}")),
            );
        }
    };
    match dispatch(state, user, command).await {
        Ok(payload) => WsMessage::response(msg.id, payload),
        Err(err) => {
            tracing::debug!(user_id = %user, error = %err, "ws command rejected");
            WsMessage::error(msg.id, &err)
        }
    }
}

async fn dispatch(
    state: &AppState,
    user: UserId,
    command: WsCommand,
) -> Result<serde_json::Value, GatewayError> {
    let payload = match command {
        WsCommand::SendMessage {
            conversation_id,
            content,
            action_response,
        } => {
            let request = SendMessageRequest {
                content,
                action_response,
            };
            let response = state
                .send_message(ConversationId::from(conversation_id), user, request)
                .await?;
            serde_json::to_value(response)
        }
        WsCommand::ButtonClick {
            conversation_id,
            button_id,
            payload,
        } => {
            let response = state
                .click_button(
                    ConversationId::from(conversation_id),
                    user,
                    &button_id,
                    payload.as_ref(),
                )
                .await?;
            serde_json::to_value(response)
        }
        WsCommand::MarkSeen { conversation_id } => {
            let ids = state
                .chat
                .mark_seen(ConversationId::from(conversation_id), user)
                .await?;
            serde_json::to_value(SeenResponse {
                message_ids: ids.into_iter().map(Into::into).collect(),
            })
        }
        WsCommand::Ping => Ok(serde_json::json!({ "pong": true })),
    };
    payload.map_err(|e| GatewayError::Internal(format!("response serialization: {e}")))
}
