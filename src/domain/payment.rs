//! Gateway payment orders.
//!
//! An order is created before the brand pays (checkout or wallet top-up)
//! and settled by the gateway webhook. The order row doubles as the
//! webhook's idempotency record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::money::Minor;
use super::{ConversationId, OrderId, UserId};
use crate::error::GatewayError;

/// What an order pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderPurpose {
    /// Credit the payer's wallet.
    TopUp,
    /// Fund the escrow of a conversation.
    Escrow {
        /// Conversation waiting in `payment_pending`.
        conversation_id: ConversationId,
    },
}

impl OrderPurpose {
    /// Returns `(purpose, conversation_id)` columns.
    #[must_use]
    pub const fn columns(&self) -> (&'static str, Option<ConversationId>) {
        match self {
            Self::TopUp => ("top_up", None),
            Self::Escrow { conversation_id } => ("escrow", Some(*conversation_id)),
        }
    }

    /// Rebuilds a purpose from its columns.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Internal`] for unknown or incomplete rows.
    pub fn from_columns(
        purpose: &str,
        conversation_id: Option<ConversationId>,
    ) -> Result<Self, GatewayError> {
        match (purpose, conversation_id) {
            ("top_up", None) => Ok(Self::TopUp),
            ("escrow", Some(conversation_id)) => Ok(Self::Escrow { conversation_id }),
            (other, _) => Err(GatewayError::Internal(format!(
                "malformed order purpose: {other}"
            ))),
        }
    }
}

/// Order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Waiting for the gateway.
    Created,
    /// Paid and applied.
    Paid,
    /// Declined by the gateway.
    Failed,
    /// The conversation closed before the gateway answered. A late
    /// capture is still credited to the payer's wallet.
    Cancelled,
}

impl OrderStatus {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the order is settled for good. A cancelled order is not:
    /// its capture may still arrive.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Paid | Self::Failed)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(GatewayError::Internal(format!("unknown order status: {other}"))),
        }
    }
}

/// A gateway order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOrder {
    /// Internal id.
    pub id: OrderId,
    /// Id assigned by the gateway.
    pub gateway_order_id: String,
    /// Payer.
    pub user_id: UserId,
    /// What the order pays for.
    pub purpose: OrderPurpose,
    /// Amount in minor units.
    pub amount_minor: Minor,
    /// ISO currency code.
    pub currency: String,
    /// Lifecycle.
    pub status: OrderStatus,
    /// Gateway payment id, set when settled.
    pub gateway_payment_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl PaymentOrder {
    /// A freshly created order.
    #[must_use]
    pub fn new(
        gateway_order_id: String,
        user_id: UserId,
        purpose: OrderPurpose,
        amount_minor: Minor,
        currency: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            gateway_order_id,
            user_id,
            purpose,
            amount_minor,
            currency,
            status: OrderStatus::Created,
            gateway_payment_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Settlement of an order, written in the same unit as its effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSettlement {
    /// Order to settle.
    pub order_id: OrderId,
    /// Final status.
    pub status: OrderStatus,
    /// Gateway payment id.
    pub gateway_payment_id: String,
}
