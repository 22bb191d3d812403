//! Gateway webhook.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::WebhookAckResponse;
use crate::app_state::AppState;
use crate::error::{ErrorResponse, GatewayError};
use crate::external::SIGNATURE_HEADER;

/// `POST /payments/webhook` — Gateway payment notification.
///
/// The raw body is verified against `x-gateway-signature` (hex
/// HMAC-SHA256). Replays of a settled order return `200` with
/// `already_processed`.
///
/// # Errors
///
/// Returns [`GatewayError`]: `401` for a bad signature, `404` for an
/// unknown order, `402` when the payer cannot cover the escrow.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    tag = "Payments",
    summary = "Gateway webhook",
    request_body(content = String, description = "`{order_id, payment_id, status}` signed by the gateway"),
    responses(
        (status = 200, description = "Webhook applied or already processed", body = WebhookAckResponse),
        (status = 401, description = "Signature rejected", body = ErrorResponse),
        (status = 404, description = "Unknown order", body = ErrorResponse),
    )
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let outcome = state.payments.webhook(&body, signature).await?;
    Ok(Json(WebhookAckResponse::from(outcome)))
}

/// Payment routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/payments/webhook", post(payment_webhook))
}
