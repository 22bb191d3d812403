//! Caller identity.
//!
//! Authentication happens upstream; the gateway trusts the `x-user-id`
//! header set by the edge proxy.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::domain::UserId;
use crate::error::GatewayError;

/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-user-id";

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| GatewayError::Unauthenticated(format!("{USER_HEADER} header is missing")))?;
        let id: uuid::Uuid = raw
            .trim()
            .parse()
            .map_err(|_| GatewayError::Unauthenticated(format!("{USER_HEADER} is not a UUID")))?;
        let user = UserId::from(id);
        if user.is_reserved() {
            return Err(GatewayError::Unauthenticated(format!(
                "{USER_HEADER} names a reserved account"
            )));
        }
        Ok(Self(user))
    }
}
