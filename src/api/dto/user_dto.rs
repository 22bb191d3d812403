//! User profile DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::user::{Role, User};
use crate::domain::UserId;

/// Request body for `POST /users`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    /// Id assigned by the identity provider; generated when omitted.
    pub id: Option<Uuid>,
    /// Marketplace role.
    pub role: Role,
    /// Name shown to other users.
    pub display_name: String,
    /// Optional avatar URL.
    pub avatar_url: Option<String>,
}

impl CreateUserRequest {
    /// Builds the profile.
    #[must_use]
    pub fn into_user(self) -> User {
        User {
            id: self.id.map_or_else(UserId::new, UserId::from),
            role: self.role,
            display_name: self.display_name.trim().to_string(),
            avatar_url: self.avatar_url,
        }
    }
}

/// A stored profile.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserResponse {
    /// User id.
    pub id: Uuid,
    /// Marketplace role.
    pub role: Role,
    /// Display name.
    pub display_name: String,
    /// Avatar URL.
    pub avatar_url: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id.into(),
            role: user.role,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
        }
    }
}
