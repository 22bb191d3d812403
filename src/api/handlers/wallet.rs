//! Wallet handlers: balances, ledger, deposits, withdrawals.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::auth::CurrentUser;
use crate::api::dto::{
    AmountRequest, CheckoutResponse, LedgerEntryDto, LedgerResponse, WalletResponse,
    WithdrawalResponse,
};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, GatewayError};

/// `GET /wallet` — The caller's balances.
///
/// # Errors
///
/// Returns [`GatewayError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/wallet",
    tag = "Wallet",
    summary = "Get balances",
    responses(
        (status = 200, description = "Balances in minor units", body = WalletResponse),
    )
)]
pub async fn get_wallet(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
) -> Result<impl IntoResponse, GatewayError> {
    let wallet = state.wallets.wallet(caller).await?;
    Ok(Json(WalletResponse::from(wallet)))
}

/// `GET /wallet/ledger` — The caller's ledger entries.
///
/// # Errors
///
/// Returns [`GatewayError`] on store failures.
#[utoipa::path(
    get,
    path = "/api/v1/wallet/ledger",
    tag = "Wallet",
    summary = "List ledger entries",
    responses(
        (status = 200, description = "Entries, newest first", body = LedgerResponse),
    )
)]
pub async fn get_ledger(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
) -> Result<impl IntoResponse, GatewayError> {
    let entries = state.wallets.ledger(caller).await?;
    Ok(Json(LedgerResponse {
        data: entries.into_iter().map(LedgerEntryDto::from).collect(),
    }))
}

/// `POST /wallet/deposits` — Create a top-up order.
///
/// # Errors
///
/// Returns [`GatewayError`] for out-of-range amounts or when the gateway
/// stays down.
#[utoipa::path(
    post,
    path = "/api/v1/wallet/deposits",
    tag = "Wallet",
    summary = "Top up",
    request_body = AmountRequest,
    responses(
        (status = 200, description = "Gateway order to pay", body = CheckoutResponse),
        (status = 422, description = "Amount out of range", body = ErrorResponse),
        (status = 503, description = "Gateway unavailable", body = ErrorResponse),
    )
)]
pub async fn create_deposit(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Json(req): Json<AmountRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let order = state.payments.top_up(caller, req.amount).await?;
    Ok(Json(CheckoutResponse::from(order)))
}

/// `POST /wallet/withdrawals` — Withdraw available funds.
///
/// # Errors
///
/// Returns [`GatewayError`]: `402` when the available balance is short,
/// `422` for out-of-range amounts.
#[utoipa::path(
    post,
    path = "/api/v1/wallet/withdrawals",
    tag = "Wallet",
    summary = "Withdraw",
    request_body = AmountRequest,
    responses(
        (status = 200, description = "Withdrawal debited", body = WithdrawalResponse),
        (status = 402, description = "Insufficient funds", body = ErrorResponse),
        (status = 422, description = "Amount out of range", body = ErrorResponse),
    )
)]
pub async fn create_withdrawal(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Json(req): Json<AmountRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let withdrawal = state.wallets.withdraw(caller, req.amount).await?;
    Ok(Json(WithdrawalResponse::from(withdrawal)))
}

/// Wallet routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/wallet", get(get_wallet))
        .route("/wallet/ledger", get(get_ledger))
        .route("/wallet/deposits", post(create_deposit))
        .route("/wallet/withdrawals", post(create_withdrawal))
}
