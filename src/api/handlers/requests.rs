//! Influencer requests: apply and connect.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use uuid::Uuid;

use crate::api::auth::CurrentUser;
use crate::api::dto::{CreateRequestRequest, OpenConversationResponse, RequestResponse};
use crate::app_state::AppState;
use crate::domain::{RequestId, UserId};
use crate::error::{ErrorResponse, GatewayError};

/// `POST /requests` — An influencer applies to a campaign or bid.
///
/// # Errors
///
/// Returns [`GatewayError`] if the caller is not an influencer or the
/// target is not a brand owner.
#[utoipa::path(
    post,
    path = "/api/v1/requests",
    tag = "Requests",
    summary = "Apply to a campaign or bid",
    request_body = CreateRequestRequest,
    responses(
        (status = 201, description = "Request created", body = RequestResponse),
        (status = 400, description = "Invalid binding", body = ErrorResponse),
        (status = 403, description = "Caller is not an influencer", body = ErrorResponse),
    )
)]
pub async fn create_request(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Json(req): Json<CreateRequestRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let binding = req.binding()?;
    let request = state
        .chat
        .apply(caller, UserId::from(req.brand_owner_id), binding)
        .await?;
    Ok((StatusCode::CREATED, Json(RequestResponse::from(request))))
}

/// `POST /requests/{id}/connect` — The brand owner opens the negotiation.
///
/// Connecting again returns the same conversation with `200`.
///
/// # Errors
///
/// Returns [`GatewayError`] if the request is unknown or owned by another
/// brand.
#[utoipa::path(
    post,
    path = "/api/v1/requests/{id}/connect",
    tag = "Requests",
    summary = "Connect to a request",
    params(("id" = Uuid, Path, description = "Request id")),
    responses(
        (status = 201, description = "Conversation opened in initial_offer", body = OpenConversationResponse),
        (status = 200, description = "Conversation already open", body = OpenConversationResponse),
        (status = 403, description = "Not the request's brand owner", body = ErrorResponse),
        (status = 404, description = "Request not found", body = ErrorResponse),
    )
)]
pub async fn connect_request(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, GatewayError> {
    let opened = state.chat.connect(RequestId::from(id), caller).await?;
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

/// Request routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/requests", post(create_request))
        .route("/requests/{id}/connect", post(connect_request))
}
