//! Type-safe identifiers.
//!
//! Every entity id is a newtype wrapper around [`uuid::Uuid`] (v4) so that
//! conversation ids, user ids and ledger entry ids cannot be confused with
//! each other at compile time.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new random identifier (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Creates an identifier from an existing [`uuid::Uuid`].
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner [`uuid::Uuid`].
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Identifier of a marketplace user (brand owner, influencer or admin).
    UserId
);
define_id!(
    /// Identifier of a two-party conversation.
    ConversationId
);
define_id!(
    /// Identifier of a chat message.
    MessageId
);
define_id!(
    /// Identifier of an append-only ledger entry. Escrow holds are
    /// referenced by the id of their `escrow_hold` entry.
    LedgerEntryId
);
define_id!(
    /// Identifier of an influencer request (application to a campaign or bid).
    RequestId
);
define_id!(
    /// Identifier of a payment order created against the gateway.
    OrderId
);

impl UserId {
    /// Reserved sender of `system` messages.
    pub const SYSTEM: Self = Self(uuid::Uuid::nil());

    /// Owner of the platform fee wallet.
    pub const PLATFORM: Self = Self(uuid::Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001));

    /// Returns `true` for the reserved system and platform ids.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        *self == Self::SYSTEM || *self == Self::PLATFORM
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_unique_ids() {
        let a = ConversationId::new();
        let b = ConversationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_uuid_format() {
        let id = UserId::new();
        let s = format!("{id}");
        assert_eq!(s.len(), 36);
        assert!(s.contains('-'));
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let id = MessageId::new();
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn reserved_ids_are_distinct() {
        assert_ne!(UserId::SYSTEM, UserId::PLATFORM);
        assert!(UserId::SYSTEM.is_reserved());
        assert!(UserId::PLATFORM.is_reserved());
        assert!(!UserId::new().is_reserved());
    }

    #[test]
    fn ordering_follows_uuid_bytes() {
        let low = UserId::from_uuid(uuid::Uuid::from_u128(1));
        let high = UserId::from_uuid(uuid::Uuid::from_u128(2));
        assert!(low < high);
    }
}
