//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the gateway. Each variant
//! maps to a specific HTTP status code and structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::conversation::FlowState;
use crate::domain::money::Minor;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2002,
///     "message": "conversation changed concurrently; now in payment_pending",
///     "details": "payment_pending"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category          | HTTP Status                          |
/// |-----------|-------------------|--------------------------------------|
/// | 1000–1999 | Validation / auth | 400, 401, 422                        |
/// | 2000–2999 | State / access    | 403 Forbidden, 404, 409 Conflict     |
/// | 3000–3999 | Server            | 500, 503                             |
/// | 4000–4999 | Flow / funds      | 402 Payment Required, 422            |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An amount is not a positive integer within the platform limits.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The caller identity is missing or malformed.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// A webhook signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// Entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The conversation moved on since the caller read it.
    #[error("conversation changed concurrently; now in {current}")]
    Conflict {
        /// Flow state stored when the write was attempted.
        current: FlowState,
    },

    /// The caller is not a participant.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// It is the other participant's turn.
    #[error("not your turn: {0}")]
    RoleMismatch(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// A ledger or state post-condition would be broken.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The payment gateway or another collaborator is unreachable.
    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    /// The command is not legal in the current flow state.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    /// The wallet cannot cover the amount.
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        /// Available balance in minor units.
        available: Minor,
        /// Required amount in minor units.
        required: Minor,
    },
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::InvalidAmount(_) => 1002,
            Self::Unauthenticated(_) => 1003,
            Self::InvalidSignature => 1004,
            Self::NotFound(_) => 2001,
            Self::Conflict { .. } => 2002,
            Self::Forbidden(_) => 2003,
            Self::RoleMismatch(_) => 2004,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::InvariantViolation(_) => 3002,
            Self::ExternalUnavailable(_) => 3003,
            Self::IllegalTransition(_) => 4001,
            Self::InsufficientFunds { .. } => 4002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidAmount(_) | Self::IllegalTransition(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Unauthenticated(_) | Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::RoleMismatch(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::Internal(_) | Self::PersistenceError(_) | Self::InvariantViolation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ExternalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalUnavailable(_))
    }

    /// The structured body sent to HTTP and socket clients.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.error_code(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::Conflict { current } => Some(current.as_str().to_string()),
            Self::InsufficientFunds {
                available,
                required,
            } => Some(format!("available={available} required={required}")),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::InvariantViolation(msg) => tracing::error!(error = %msg, "invariant violation"),
            Self::Conflict { current } => tracing::debug!(%current, "write conflict"),
            _ if status.is_server_error() => tracing::warn!(error = %self, "request failed"),
            _ => {}
        }
        let body = ErrorResponse { error: self.body() };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses() {
        let cases = [
            (GatewayError::InvalidAmount(String::new()), 1002, 422),
            (GatewayError::Forbidden(String::new()), 2003, 403),
            (GatewayError::RoleMismatch(String::new()), 2004, 403),
            (
                GatewayError::Conflict {
                    current: FlowState::PaymentPending,
                },
                2002,
                409,
            ),
            (GatewayError::IllegalTransition(String::new()), 4001, 422),
            (
                GatewayError::InsufficientFunds {
                    available: 1,
                    required: 2,
                },
                4002,
                402,
            ),
            (GatewayError::ExternalUnavailable(String::new()), 3003, 503),
            (GatewayError::InvalidSignature, 1004, 401),
        ];
        for (err, code, status) in cases {
            assert_eq!(err.error_code(), code, "{err}");
            assert_eq!(err.status_code().as_u16(), status, "{err}");
        }
    }

    #[test]
    fn conflict_details_carry_current_state() {
        let err = GatewayError::Conflict {
            current: FlowState::BrandOwnerNegotiation,
        };
        assert_eq!(err.details().as_deref(), Some("brand_owner_negotiation"));
    }

    #[test]
    fn only_external_failures_are_retryable() {
        assert!(GatewayError::ExternalUnavailable("timeout".into()).is_retryable());
        assert!(!GatewayError::IllegalTransition("x".into()).is_retryable());
        assert!(
            !GatewayError::Conflict {
                current: FlowState::Closed
            }
            .is_retryable()
        );
    }
}
