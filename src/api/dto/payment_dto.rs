//! Checkout and webhook DTOs.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::money::Minor;
use crate::domain::payment::{OrderStatus, PaymentOrder};
use crate::service::WebhookOutcome;

/// A gateway order the client pays against.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    /// Internal order id.
    pub order_id: Uuid,
    /// Id to hand to the gateway's client SDK.
    pub gateway_order_id: String,
    /// Amount in minor units.
    pub amount_minor: Minor,
    /// ISO currency code.
    pub currency: String,
    /// Order status.
    pub status: OrderStatus,
}

impl From<PaymentOrder> for CheckoutResponse {
    fn from(order: PaymentOrder) -> Self {
        Self {
            order_id: order.id.into(),
            gateway_order_id: order.gateway_order_id,
            amount_minor: order.amount_minor,
            currency: order.currency,
            status: order.status,
        }
    }
}

/// Webhook acknowledgement.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookAckResponse {
    /// Always `true` for a 200.
    pub received: bool,
    /// `top_up_credited`, `escrow_funded`, `credited_to_wallet`, `failed`
    /// or `already_processed`.
    pub result: String,
}

impl From<WebhookOutcome> for WebhookAckResponse {
    fn from(outcome: WebhookOutcome) -> Self {
        let result = match outcome {
            WebhookOutcome::TopUpCredited => "top_up_credited",
            WebhookOutcome::EscrowFunded { .. } => "escrow_funded",
            WebhookOutcome::CreditedToWallet { .. } => "credited_to_wallet",
            WebhookOutcome::Failed => "failed",
            WebhookOutcome::AlreadyProcessed => "already_processed",
        };
        Self {
            received: true,
            result: result.to_string(),
        }
    }
}
