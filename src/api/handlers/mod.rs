//! REST endpoint handlers organized by resource.

pub mod conversations;
pub mod payments;
pub mod requests;
pub mod system;
pub mod users;
pub mod wallet;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(users::routes())
        .merge(requests::routes())
        .merge(conversations::routes())
        .merge(payments::routes())
        .merge(wallet::routes())
}
