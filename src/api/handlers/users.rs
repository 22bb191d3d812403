//! User profile projection.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{CreateUserRequest, UserResponse};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, GatewayError};

/// `POST /users` — Register or refresh a user profile.
///
/// Profiles are owned by the identity service upstream; this keeps the
/// projection the chat needs for names and avatars.
///
/// # Errors
///
/// Returns [`GatewayError`] for reserved ids or an empty name.
#[utoipa::path(
    post,
    path = "/api/v1/users",
    tag = "Users",
    summary = "Register a user profile",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Profile stored", body = UserResponse),
        (status = 400, description = "Invalid profile", body = ErrorResponse),
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let user = state.chat.register_user(req.into_user()).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// User routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/users", post(create_user))
}
