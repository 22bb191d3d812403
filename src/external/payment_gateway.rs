//! Payment gateway port.
//!
//! The chat core only needs two calls: create an order the client pays
//! against, and pay a withdrawal out. Settlement comes back through the
//! signed webhook, never as a return value.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::UserId;
use crate::domain::money::Minor;
use crate::error::GatewayError;

/// Order to create at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Our reference, echoed back by the gateway.
    pub receipt: String,
    /// Amount in minor units.
    pub amount_minor: Minor,
    /// ISO currency code.
    pub currency: String,
}

/// Order created by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    /// Gateway-assigned order id.
    pub gateway_order_id: String,
    /// Amount in minor units.
    pub amount_minor: Minor,
    /// ISO currency code.
    pub currency: String,
}

/// Payout of withdrawn funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRequest {
    /// Payee.
    pub user_id: UserId,
    /// Amount in minor units.
    pub amount_minor: Minor,
    /// ISO currency code.
    pub currency: String,
    /// Idempotency reference (the withdrawal ledger entry id).
    pub reference: String,
}

/// Gateway acknowledgement of a payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutReceipt {
    /// Gateway-assigned payout id.
    pub payout_id: String,
}

/// Payment gateway operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync + std::fmt::Debug {
    /// Creates an order.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ExternalUnavailable`] when the gateway cannot be
    /// reached; callers retry those.
    async fn create_order(&self, request: OrderRequest) -> Result<GatewayOrder, GatewayError>;

    /// Sends a payout.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ExternalUnavailable`] when the gateway cannot be
    /// reached.
    async fn payout(&self, request: PayoutRequest) -> Result<PayoutReceipt, GatewayError>;
}

/// In-process gateway that accepts everything.
///
/// `flaky(n)` makes the first `n` calls fail with
/// [`GatewayError::ExternalUnavailable`].
#[derive(Debug, Default)]
pub struct SandboxGateway {
    failures_left: AtomicU32,
    calls: AtomicU64,
}

impl SandboxGateway {
    /// A gateway that never fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway whose first `failures` calls are unavailable.
    #[must_use]
    pub fn flaky(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU64::new(0),
        }
    }

    /// Number of calls made so far, failed ones included.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn enter(&self, op: &str) -> Result<(), GatewayError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let failed = self
            .failures_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(GatewayError::ExternalUnavailable(format!(
                "sandbox {op} unavailable"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_order(&self, request: OrderRequest) -> Result<GatewayOrder, GatewayError> {
        self.enter("create_order")?;
        Ok(GatewayOrder {
            gateway_order_id: format!("order_{}", Uuid::new_v4().simple()),
            amount_minor: request.amount_minor,
            currency: request.currency,
        })
    }

    async fn payout(&self, request: PayoutRequest) -> Result<PayoutReceipt, GatewayError> {
        self.enter("payout")?;
        tracing::debug!(user_id = %request.user_id, amount = request.amount_minor, "sandbox payout");
        Ok(PayoutReceipt {
            payout_id: format!("pout_{}", Uuid::new_v4().simple()),
        })
    }
}
