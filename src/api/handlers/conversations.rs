//! Conversation handlers: open, list, history, commands, seen, checkout.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::api::auth::CurrentUser;
use crate::api::dto::{
    ButtonClickRequest, CheckoutResponse, CommandResponse, ConversationListResponse,
    HistoryParams, MessageListResponse, OpenConversationResponse, OpenDirectRequest, PageParams,
    SeenResponse, SendMessageRequest,
};
use crate::app_state::AppState;
use crate::domain::view::{ConversationView, MessageView};
use crate::domain::{ConversationId, UserId};
use crate::error::{ErrorResponse, GatewayError};
use crate::service::MAX_PAGE;

/// `POST /conversations` — Open the direct chat with another user.
///
/// # Errors
///
/// Returns [`GatewayError`] for an unknown user or a chat with oneself.
#[utoipa::path(
    post,
    path = "/api/v1/conversations",
    tag = "Conversations",
    summary = "Open a direct chat",
    description = "Direct chats start in real_time. Opening one twice returns the existing chat.",
    request_body = OpenDirectRequest,
    responses(
        (status = 201, description = "Chat created", body = OpenConversationResponse),
        (status = 200, description = "Chat already existed", body = OpenConversationResponse),
        (status = 400, description = "Invalid counterpart", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn open_direct(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Json(req): Json<OpenDirectRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let opened = state
        .chat
        .open_direct(caller, UserId::from(req.user_id))
        .await?;
    let conversation = state.chat.view_of(&opened.record, caller).await?;
    let status = if opened.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(OpenConversationResponse {
            conversation,
            created: opened.created,
        }),
    ))
}

/// `GET /conversations` — The caller's conversations, newest first.
///
/// # Errors
///
/// Returns [`GatewayError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/conversations",
    tag = "Conversations",
    summary = "List conversations",
    params(PageParams),
    responses(
        (status = 200, description = "One page of conversations", body = ConversationListResponse),
    )
)]
pub async fn list_conversations(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, GatewayError> {
    let limit = params.limit.clamp(1, MAX_PAGE);
    let data = state.chat.list(caller, params.cursor, limit).await?;
    let full_page = u32::try_from(data.len()).is_ok_and(|n| n == limit);
    let next_cursor = data
        .last()
        .filter(|_| full_page)
        .map(|view| view.updated_at);
    Ok(Json(ConversationListResponse { data, next_cursor }))
}

/// `GET /conversations/{id}` — One conversation as a list entry.
///
/// # Errors
///
/// Returns [`GatewayError`] if the caller is not a participant.
#[utoipa::path(
    get,
    path = "/api/v1/conversations/{id}",
    tag = "Conversations",
    summary = "Get a conversation",
    params(("id" = Uuid, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Conversation", body = ConversationView),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 404, description = "Conversation not found", body = ErrorResponse),
    )
)]
pub async fn get_conversation(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, GatewayError> {
    let view = state.chat.view(ConversationId::from(id), caller).await?;
    Ok(Json(view))
}

/// `GET /conversations/{id}/messages` — Message history.
///
/// # Errors
///
/// Returns [`GatewayError`] if the caller is not a participant.
#[utoipa::path(
    get,
    path = "/api/v1/conversations/{id}/messages",
    tag = "Conversations",
    summary = "List messages",
    params(("id" = Uuid, Path, description = "Conversation id"), HistoryParams),
    responses(
        (status = 200, description = "Messages, oldest first", body = MessageListResponse),
        (status = 403, description = "Not a participant", body = ErrorResponse),
    )
)]
pub async fn list_messages(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, GatewayError> {
    let messages = state
        .chat
        .messages(ConversationId::from(id), caller, params.before, params.limit)
        .await?;
    Ok(Json(MessageListResponse {
        data: messages.iter().map(MessageView::from).collect(),
    }))
}

/// `POST /conversations/{id}/messages` — Send text or an action response.
///
/// # Errors
///
/// Returns [`GatewayError`]: `409` when the conversation moved on, `403`
/// out of turn, `422` for illegal commands or amounts, `402` when escrow
/// cannot be funded.
#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/messages",
    tag = "Conversations",
    summary = "Send a message",
    params(("id" = Uuid, Path, description = "Conversation id")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Command committed", body = CommandResponse),
        (status = 403, description = "Not a participant or not your turn", body = ErrorResponse),
        (status = 409, description = "Conversation changed concurrently", body = ErrorResponse),
        (status = 422, description = "Illegal command or amount", body = ErrorResponse),
    )
)]
pub async fn send_message(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let response = state
        .send_message(ConversationId::from(id), caller, req)
        .await?;
    Ok(Json(response))
}

/// `POST /conversations/{id}/button-click` — Click a rendered button.
///
/// The command comes from `button_id` alone and is checked against the
/// buttons of the current state.
///
/// # Errors
///
/// Same as [`send_message`]; `503` when a payment click cannot reach the
/// gateway.
#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/button-click",
    tag = "Conversations",
    summary = "Click an action button",
    params(("id" = Uuid, Path, description = "Conversation id")),
    request_body = ButtonClickRequest,
    responses(
        (status = 200, description = "Command committed or checkout created", body = CommandResponse),
        (status = 403, description = "Not a participant or not your turn", body = ErrorResponse),
        (status = 409, description = "Conversation changed concurrently", body = ErrorResponse),
        (status = 422, description = "Button not available", body = ErrorResponse),
    )
)]
pub async fn button_click(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ButtonClickRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let response = state
        .click_button(ConversationId::from(id), caller, &req.button_id, req.fields())
        .await?;
    Ok(Json(response))
}

/// `POST /conversations/{id}/seen` — Mark inbound messages seen.
///
/// # Errors
///
/// Returns [`GatewayError`] if the caller is not a participant.
#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/seen",
    tag = "Conversations",
    summary = "Mark messages seen",
    params(("id" = Uuid, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Messages marked", body = SeenResponse),
        (status = 403, description = "Not a participant", body = ErrorResponse),
    )
)]
pub async fn mark_seen(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, GatewayError> {
    let ids = state.chat.mark_seen(ConversationId::from(id), caller).await?;
    Ok(Json(SeenResponse {
        message_ids: ids.into_iter().map(Into::into).collect(),
    }))
}

/// `POST /conversations/{id}/checkout` — Create the escrow gateway order.
///
/// # Errors
///
/// Returns [`GatewayError`] outside `payment_pending`, for the influencer,
/// or `503` when the gateway stays down.
#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/checkout",
    tag = "Payments",
    summary = "Start escrow checkout",
    params(("id" = Uuid, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Gateway order to pay", body = CheckoutResponse),
        (status = 403, description = "Only the brand owner pays", body = ErrorResponse),
        (status = 422, description = "Not awaiting payment", body = ErrorResponse),
        (status = 503, description = "Gateway unavailable", body = ErrorResponse),
    )
)]
pub async fn checkout(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, GatewayError> {
    let order = state
        .payments
        .checkout(ConversationId::from(id), caller)
        .await?;
    Ok(Json(CheckoutResponse::from(order)))
}

/// Conversation routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/conversations",
            post(open_direct).get(list_conversations),
        )
        .route("/conversations/{id}", get(get_conversation))
        .route(
            "/conversations/{id}/messages",
            get(list_messages).post(send_message),
        )
        .route("/conversations/{id}/button-click", post(button_click))
        .route("/conversations/{id}/seen", post(mark_seen))
        .route("/conversations/{id}/checkout", post(checkout))
}
