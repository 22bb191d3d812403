//! Users as the chat core sees them: id, role and display profile.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::UserId;
use crate::error::GatewayError;

/// Marketplace role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Posts campaigns and bids, pays for work.
    BrandOwner,
    /// Applies to campaigns and delivers work.
    Influencer,
    /// Platform operator.
    Admin,
}

impl Role {
    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BrandOwner => "brand_owner",
            Self::Influencer => "influencer",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "brand_owner" => Ok(Self::BrandOwner),
            "influencer" => Ok(Self::Influencer),
            "admin" => Ok(Self::Admin),
            other => Err(GatewayError::InvalidRequest(format!("unknown role: {other}"))),
        }
    }
}

/// Profile projection of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Immutable user id.
    pub id: UserId,
    /// Marketplace role.
    pub role: Role,
    /// Name shown to the other participant.
    pub display_name: String,
    /// Optional avatar URL.
    pub avatar_url: Option<String>,
}

impl User {
    /// Creates a user with a fresh id and no avatar.
    #[must_use]
    pub fn new(role: Role, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            role,
            display_name: display_name.into(),
            avatar_url: None,
        }
    }
}

/// The other participant as shown in a conversation list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    /// User id.
    #[schema(value_type = uuid::Uuid)]
    pub id: UserId,
    /// Marketplace role.
    pub role: Role,
    /// Display name.
    pub display_name: String,
    /// Avatar URL, if any.
    pub avatar_url: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}
