//! Shared DTO types used across multiple endpoints.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;

/// Cursor pagination for the conversation list.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// Return conversations updated strictly before this instant.
    pub cursor: Option<DateTime<Utc>>,
    /// Page size (max 100). Defaults to 20.
    #[serde(default = "default_limit")]
    pub limit: u32,
}

/// Backwards paging through message history.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryParams {
    /// Return messages created strictly before this instant.
    pub before: Option<DateTime<Utc>>,
    /// Page size (max 100). Defaults to 50.
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

fn default_history_limit() -> u32 {
    50
}
