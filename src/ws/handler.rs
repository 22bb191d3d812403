//! Axum WebSocket upgrade handler.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

use super::connection::run_connection;
use crate::api::auth::USER_HEADER;
use crate::app_state::AppState;
use crate::domain::UserId;
use crate::error::GatewayError;

/// Query parameters accepted on upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Caller id for clients that cannot set headers on the upgrade.
    pub user_id: Option<Uuid>,
}

/// `GET /ws` — Upgrade HTTP connection to WebSocket and join the caller's
/// room.
///
/// # Errors
///
/// Returns [`GatewayError::Unauthenticated`] when neither the `x-user-id`
/// header nor `?user_id=` names a valid user.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, GatewayError> {
    let user = resolve_user(&headers, &params)?;
    let event_rx = state.event_bus.subscribe();
    tracing::debug!(user_id = %user, "ws upgrade");
    Ok(ws.on_upgrade(move |socket| run_connection(socket, event_rx, state, user)))
}

fn resolve_user(headers: &HeaderMap, params: &WsParams) -> Result<UserId, GatewayError> {
    let from_header = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<Uuid>().ok());
    let user = from_header
        .or(params.user_id)
        .map(UserId::from)
        .ok_or_else(|| GatewayError::Unauthenticated(format!("{USER_HEADER} is required")))?;
    if user.is_reserved() {
        return Err(GatewayError::Unauthenticated(format!(
            "{USER_HEADER} names a reserved account"
        )));
    }
    Ok(user)
}
