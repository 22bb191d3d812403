//! Gateway orders and the payment webhook.
//!
//! Checkout never runs inside a store transaction. The order is created at
//! the gateway first, then recorded; the money only moves when the signed
//! webhook comes back, and then in the same unit as the transition it
//! drives.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::chat_service::ChatService;
use crate::domain::conversation::FlowState;
use crate::domain::money::{AmountLimits, Minor};
use crate::domain::payment::{OrderPurpose, OrderSettlement, OrderStatus, PaymentOrder};
use crate::domain::user::Role;
use crate::domain::{ConversationId, UserId};
use crate::error::GatewayError;
use crate::external::{OrderRequest, PaymentGateway, RetryPolicy, WebhookVerifier};
use crate::store::ChatStore;

/// Status the gateway reports for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    /// Captured.
    Paid,
    /// Declined or abandoned.
    Failed,
}

/// Webhook body as signed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Gateway order id.
    pub order_id: String,
    /// Gateway payment id.
    pub payment_id: String,
    /// Outcome.
    pub status: WebhookStatus,
}

/// What a webhook delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// A top-up was credited.
    TopUpCredited,
    /// An escrow was frozen and the conversation moved to
    /// `payment_completed`.
    EscrowFunded {
        /// Funded conversation.
        conversation_id: ConversationId,
    },
    /// An escrow capture arrived after its conversation left
    /// `payment_pending`; the amount went to the payer's wallet instead.
    CreditedToWallet {
        /// Conversation the order was created for.
        conversation_id: ConversationId,
    },
    /// The order was marked failed.
    Failed,
    /// The order was already settled; nothing changed.
    AlreadyProcessed,
}

/// Creates gateway orders and applies their webhooks.
#[derive(Debug, Clone)]
pub struct PaymentService {
    store: Arc<dyn ChatStore>,
    chat: ChatService,
    gateway: Arc<dyn PaymentGateway>,
    verifier: Arc<WebhookVerifier>,
    retry: RetryPolicy,
    currency: String,
    limits: AmountLimits,
}

impl PaymentService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        chat: ChatService,
        gateway: Arc<dyn PaymentGateway>,
        verifier: WebhookVerifier,
        retry: RetryPolicy,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store: Arc::clone(chat.store()),
            limits: chat.policy().limits,
            chat,
            gateway,
            verifier: Arc::new(verifier),
            retry,
            currency: currency.into(),
        }
    }

    /// Creates (or returns the open) escrow order for a conversation in
    /// `payment_pending`.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Forbidden`] for non-participants.
    /// - [`GatewayError::RoleMismatch`] when the influencer asks.
    /// - [`GatewayError::IllegalTransition`] outside `payment_pending`.
    /// - [`GatewayError::ExternalUnavailable`] when the gateway stays down.
    pub async fn checkout(
        &self,
        conversation_id: ConversationId,
        caller: UserId,
    ) -> Result<PaymentOrder, GatewayError> {
        let record = self.store.load(conversation_id).await?;
        let conversation = record.conversation;
        match conversation.role_of(caller) {
            None => {
                return Err(GatewayError::Forbidden(format!(
                    "user {caller} is not part of conversation {conversation_id}"
                )));
            }
            Some(Role::BrandOwner) => {}
            Some(_) => {
                return Err(GatewayError::RoleMismatch(
                    "only the brand owner pays".to_string(),
                ));
            }
        }
        if conversation.flow_state != FlowState::PaymentPending {
            return Err(GatewayError::IllegalTransition(format!(
                "checkout is not available in {}",
                conversation.flow_state
            )));
        }
        if let Some(existing) = &conversation.gateway_order_id
            && let Some(order) = self.store.find_order(existing).await?
            && order.status == OrderStatus::Created
        {
            tracing::debug!(%conversation_id, gateway_order_id = %existing, "reusing open order");
            return Ok(order);
        }
        let amount = conversation.final_agreed_amount.ok_or_else(|| {
            GatewayError::InvariantViolation(format!(
                "conversation {conversation_id} has no agreed amount"
            ))
        })?;

        let order = self
            .create_order(
                caller,
                OrderPurpose::Escrow { conversation_id },
                amount,
                format!("conv_{conversation_id}"),
            )
            .await?;
        self.store
            .set_gateway_order(conversation_id, &order.gateway_order_id)
            .await?;
        tracing::info!(
            %conversation_id,
            user_id = %caller,
            gateway_order_id = %order.gateway_order_id,
            amount_minor = amount,
            "escrow checkout created"
        );
        Ok(order)
    }

    /// Creates a wallet top-up order.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidAmount`] outside the platform limits and
    /// [`GatewayError::ExternalUnavailable`] when the gateway stays down.
    pub async fn top_up(&self, user: UserId, amount: Minor) -> Result<PaymentOrder, GatewayError> {
        self.limits.check(amount)?;
        self.store.get_user(user).await?;
        let order = self
            .create_order(user, OrderPurpose::TopUp, amount, format!("topup_{user}"))
            .await?;
        tracing::info!(
            user_id = %user,
            gateway_order_id = %order.gateway_order_id,
            amount_minor = amount,
            "top-up order created"
        );
        Ok(order)
    }

    async fn create_order(
        &self,
        user: UserId,
        purpose: OrderPurpose,
        amount: Minor,
        receipt: String,
    ) -> Result<PaymentOrder, GatewayError> {
        let request = OrderRequest {
            receipt,
            amount_minor: amount,
            currency: self.currency.clone(),
        };
        let gateway_order = self
            .retry
            .run("create_order", || {
                let gateway = Arc::clone(&self.gateway);
                let request = request.clone();
                async move { gateway.create_order(request).await }
            })
            .await?;
        let order = PaymentOrder::new(
            gateway_order.gateway_order_id,
            user,
            purpose,
            amount,
            gateway_order.currency,
        );
        self.store.insert_order(&order).await?;
        Ok(order)
    }

    /// Verifies and applies a gateway webhook.
    ///
    /// Deliveries for an order that is already paid or failed are
    /// acknowledged without effect, so gateway retries are safe. Captured
    /// money is always recorded: it funds the escrow while the conversation
    /// waits in `payment_pending`, and lands in the payer's wallet
    /// otherwise.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidSignature`] for a bad signature.
    /// - [`GatewayError::InvalidRequest`] for a malformed body.
    /// - [`GatewayError::NotFound`] for an unknown order.
    /// - [`GatewayError::Conflict`] when the conversation changed during
    ///   the delivery; the gateway retries.
    pub async fn webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, GatewayError> {
        self.verifier.verify(body, signature).inspect_err(|_| {
            tracing::warn!("webhook signature rejected");
        })?;
        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|e| GatewayError::InvalidRequest(format!("malformed webhook: {e}")))?;

        let order = self
            .store
            .find_order(&payload.order_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("order {}", payload.order_id)))?;
        if order.status.is_final() {
            tracing::info!(gateway_order_id = %order.gateway_order_id, status = %order.status.as_str(), "webhook replay ignored");
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let status = match payload.status {
            WebhookStatus::Paid => OrderStatus::Paid,
            WebhookStatus::Failed => OrderStatus::Failed,
        };
        let settlement = OrderSettlement {
            order_id: order.id,
            status,
            gateway_payment_id: payload.payment_id,
        };

        match (payload.status, order.purpose) {
            (WebhookStatus::Failed, purpose) => {
                self.store.fail_order(settlement).await?;
                tracing::info!(gateway_order_id = %order.gateway_order_id, "order failed");
                if let OrderPurpose::Escrow { conversation_id } = purpose
                    && let Err(e) = self
                        .chat
                        .post_notice(
                            conversation_id,
                            order.user_id,
                            "The payment did not go through. Please try again.",
                        )
                        .await
                {
                    tracing::warn!(%conversation_id, error = %e, "failed-payment notice not posted");
                }
                Ok(WebhookOutcome::Failed)
            }
            (WebhookStatus::Paid, OrderPurpose::TopUp) => {
                match self.store.settle_deposit(settlement).await? {
                    Some(entry) => {
                        tracing::info!(
                            user_id = %order.user_id,
                            entry_id = %entry.id,
                            amount_minor = entry.amount_minor,
                            "top-up credited"
                        );
                        Ok(WebhookOutcome::TopUpCredited)
                    }
                    None => Ok(WebhookOutcome::AlreadyProcessed),
                }
            }
            (WebhookStatus::Paid, OrderPurpose::Escrow { conversation_id }) => {
                self.capture_escrow(&order, conversation_id, settlement).await
            }
        }
    }

    async fn capture_escrow(
        &self,
        order: &PaymentOrder,
        conversation_id: ConversationId,
        settlement: OrderSettlement,
    ) -> Result<WebhookOutcome, GatewayError> {
        let state = self.store.load(conversation_id).await?.conversation.flow_state;
        if state != FlowState::PaymentPending {
            return self.credit_late_capture(order, conversation_id, state, settlement).await;
        }
        match self
            .chat
            .confirm_payment(conversation_id, settlement.clone())
            .await
        {
            Ok(_) => Ok(WebhookOutcome::EscrowFunded { conversation_id }),
            Err(e @ (GatewayError::Conflict { .. } | GatewayError::IllegalTransition(_))) => {
                let settled = self
                    .store
                    .find_order(&order.gateway_order_id)
                    .await?
                    .is_some_and(|o| o.status.is_final());
                if settled {
                    return Ok(WebhookOutcome::AlreadyProcessed);
                }
                let state = self.store.load(conversation_id).await?.conversation.flow_state;
                if state == FlowState::PaymentPending {
                    Err(e)
                } else {
                    self.credit_late_capture(order, conversation_id, state, settlement)
                        .await
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn credit_late_capture(
        &self,
        order: &PaymentOrder,
        conversation_id: ConversationId,
        flow_state: FlowState,
        settlement: OrderSettlement,
    ) -> Result<WebhookOutcome, GatewayError> {
        let Some(entry) = self.store.settle_deposit(settlement).await? else {
            return Ok(WebhookOutcome::AlreadyProcessed);
        };
        tracing::warn!(
            %conversation_id,
            %flow_state,
            user_id = %order.user_id,
            gateway_order_id = %order.gateway_order_id,
            amount_minor = entry.amount_minor,
            "escrow captured after the conversation moved on; credited to wallet"
        );
        Ok(WebhookOutcome::CreditedToWallet { conversation_id })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::command::{Actor, Command};
    use crate::domain::conversation::Binding;
    use crate::domain::money::CommissionRate;
    use crate::domain::user::User;
    use crate::domain::EventBus;
    use crate::engine::FlowPolicy;
    use crate::external::{LogNotifier, SandboxGateway};
    use crate::service::fanout::FanoutDispatcher;
    use crate::service::settings_service::SettingsHolder;
    use crate::service::sweep::IdleSweeper;
    use crate::store::MemoryStore;

    const SECRET: &str = "whsec_test";

    struct Harness {
        payments: PaymentService,
        chat: ChatService,
        store: Arc<MemoryStore>,
        brand: UserId,
        influencer: UserId,
    }

    fn harness_with(gateway: SandboxGateway) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let dyn_store = Arc::clone(&store) as Arc<dyn ChatStore>;
        let bus = EventBus::new(256);
        let (outbox, _handle) = FanoutDispatcher::spawn(Arc::clone(&dyn_store), bus.clone());
        let chat = ChatService::new(
            Arc::clone(&dyn_store),
            outbox,
            bus,
            SettingsHolder::new(dyn_store, CommissionRate::DEFAULT),
            Arc::new(LogNotifier),
            FlowPolicy::default(),
        );
        let retry = RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };
        let payments = PaymentService::new(
            chat.clone(),
            Arc::new(gateway),
            WebhookVerifier::new(SECRET),
            retry,
            "INR",
        );
        Harness {
            payments,
            chat,
            store,
            brand: UserId::new(),
            influencer: UserId::new(),
        }
    }

    async fn register(h: &mut Harness) {
        let Ok(brand) = h.chat.register_user(User::new(Role::BrandOwner, "Acme")).await else {
            panic!("brand");
        };
        let Ok(influencer) = h.chat.register_user(User::new(Role::Influencer, "Ivy")).await else {
            panic!("influencer");
        };
        h.brand = brand.id;
        h.influencer = influencer.id;
    }

    async fn pending(h: &Harness, amount: Minor) -> ConversationId {
        let Ok(request) = h
            .chat
            .apply(h.influencer, h.brand, Binding::Campaign(uuid::Uuid::new_v4()))
            .await
        else {
            panic!("applied");
        };
        let Ok(opened) = h.chat.connect(request.id, h.brand).await else {
            panic!("connected");
        };
        let id = opened.record.conversation.id;
        let offer = h
            .chat
            .execute(id, Actor::Participant(h.brand), Command::SendPriceOffer { amount })
            .await;
        assert!(offer.is_ok());
        let accept = h
            .chat
            .execute(id, Actor::Participant(h.influencer), Command::AcceptPrice)
            .await;
        assert!(accept.is_ok());
        id
    }

    fn signed(order_id: &str, status: &str) -> (Vec<u8>, String) {
        let body = serde_json::json!({
            "order_id": order_id,
            "payment_id": "pay_123",
            "status": status,
        })
        .to_string()
        .into_bytes();
        let Ok(signature) = WebhookVerifier::new(SECRET).sign(&body) else {
            panic!("sign");
        };
        (body, signature)
    }

    #[tokio::test]
    async fn checkout_is_brand_only_and_reuses_open_order() {
        let mut h = harness_with(SandboxGateway::new());
        register(&mut h).await;
        let id = pending(&h, 300_000).await;

        assert!(matches!(
            h.payments.checkout(id, h.influencer).await,
            Err(GatewayError::RoleMismatch(_))
        ));
        let Ok(first) = h.payments.checkout(id, h.brand).await else {
            panic!("checkout");
        };
        assert_eq!(first.amount_minor, 300_000);
        let Ok(second) = h.payments.checkout(id, h.brand).await else {
            panic!("second checkout");
        };
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn checkout_retries_a_flaky_gateway() {
        let mut h = harness_with(SandboxGateway::flaky(2));
        register(&mut h).await;
        let id = pending(&h, 300_000).await;
        assert!(h.payments.checkout(id, h.brand).await.is_ok());
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let mut h = harness_with(SandboxGateway::new());
        register(&mut h).await;
        let (body, _) = signed("order_x", "paid");
        assert!(matches!(
            h.payments.webhook(&body, Some("deadbeef")).await,
            Err(GatewayError::InvalidSignature)
        ));
        assert!(matches!(
            h.payments.webhook(&body, None).await,
            Err(GatewayError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn escrow_webhook_funds_the_hold_once() {
        let mut h = harness_with(SandboxGateway::new());
        register(&mut h).await;
        let id = pending(&h, 300_000).await;
        let Ok(_) = h.store.deposit(h.brand, 500_000).await else {
            panic!("deposit");
        };
        let Ok(order) = h.payments.checkout(id, h.brand).await else {
            panic!("checkout");
        };
        let (body, signature) = signed(&order.gateway_order_id, "paid");

        let first = h.payments.webhook(&body, Some(&signature)).await;
        assert!(matches!(first, Ok(WebhookOutcome::EscrowFunded { conversation_id }) if conversation_id == id));
        let replay = h.payments.webhook(&body, Some(&signature)).await;
        assert!(matches!(replay, Ok(WebhookOutcome::AlreadyProcessed)));

        let Ok(wallet) = h.store.wallet(h.brand).await else {
            panic!("wallet");
        };
        assert_eq!(wallet.available, 500_000);
        assert_eq!(wallet.frozen, 300_000);
        assert_eq!(h.store.money_totals().await, (800_000, 800_000));
    }

    #[tokio::test]
    async fn escrow_capture_funds_a_brand_without_balance() {
        let mut h = harness_with(SandboxGateway::new());
        register(&mut h).await;
        let id = pending(&h, 300_000).await;
        let Ok(order) = h.payments.checkout(id, h.brand).await else {
            panic!("checkout");
        };
        let (body, signature) = signed(&order.gateway_order_id, "paid");
        assert!(matches!(
            h.payments.webhook(&body, Some(&signature)).await,
            Ok(WebhookOutcome::EscrowFunded { .. })
        ));

        let Ok(Some(settled)) = h.store.find_order(&order.gateway_order_id).await else {
            panic!("order");
        };
        assert_eq!(settled.status, OrderStatus::Paid);
        let Ok(entries) = h.store.ledger_entries(h.brand).await else {
            panic!("ledger");
        };
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .all(|e| e.refs.gateway_payment_id.as_deref() == Some("pay_123")));
        let Ok(wallet) = h.store.wallet(h.brand).await else {
            panic!("wallet");
        };
        assert_eq!((wallet.available, wallet.frozen), (0, 300_000));
        assert_eq!(h.store.money_totals().await, (300_000, 300_000));
    }

    #[tokio::test]
    async fn capture_after_timeout_lands_in_the_wallet() {
        let mut h = harness_with(SandboxGateway::new());
        register(&mut h).await;
        let id = pending(&h, 300_000).await;
        let Ok(order) = h.payments.checkout(id, h.brand).await else {
            panic!("checkout");
        };

        let sweeper = IdleSweeper::new(
            h.chat.clone(),
            chrono::Duration::hours(72),
            Duration::from_secs(60),
        );
        let later = chrono::Utc::now() + chrono::Duration::hours(73);
        let Ok(report) = sweeper.sweep_once(later).await else {
            panic!("sweep");
        };
        assert_eq!(report.timed_out, 1);
        let Ok(Some(cancelled)) = h.store.find_order(&order.gateway_order_id).await else {
            panic!("order");
        };
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let (body, signature) = signed(&order.gateway_order_id, "paid");
        let outcome = h.payments.webhook(&body, Some(&signature)).await;
        assert!(matches!(outcome, Ok(WebhookOutcome::CreditedToWallet { conversation_id }) if conversation_id == id));
        let replay = h.payments.webhook(&body, Some(&signature)).await;
        assert!(matches!(replay, Ok(WebhookOutcome::AlreadyProcessed)));

        let Ok(Some(settled)) = h.store.find_order(&order.gateway_order_id).await else {
            panic!("order");
        };
        assert_eq!(settled.status, OrderStatus::Paid);
        let Ok(record) = h.store.load(id).await else {
            panic!("conversation");
        };
        assert_eq!(record.conversation.flow_state, FlowState::Closed);
        let Ok(wallet) = h.store.wallet(h.brand).await else {
            panic!("wallet");
        };
        assert_eq!((wallet.available, wallet.frozen), (300_000, 0));
        assert_eq!(h.store.money_totals().await, (300_000, 300_000));
    }

    #[tokio::test]
    async fn top_up_webhook_credits_the_wallet() {
        let mut h = harness_with(SandboxGateway::new());
        register(&mut h).await;
        let Ok(order) = h.payments.top_up(h.brand, 50_000).await else {
            panic!("top-up");
        };
        let (body, signature) = signed(&order.gateway_order_id, "paid");
        assert!(matches!(
            h.payments.webhook(&body, Some(&signature)).await,
            Ok(WebhookOutcome::TopUpCredited)
        ));
        let Ok(wallet) = h.store.wallet(h.brand).await else {
            panic!("wallet");
        };
        assert_eq!(wallet.available, 50_000);
    }

    #[tokio::test]
    async fn failed_escrow_keeps_payment_pending() {
        let mut h = harness_with(SandboxGateway::new());
        register(&mut h).await;
        let id = pending(&h, 300_000).await;
        let Ok(order) = h.payments.checkout(id, h.brand).await else {
            panic!("checkout");
        };
        let (body, signature) = signed(&order.gateway_order_id, "failed");
        assert!(matches!(
            h.payments.webhook(&body, Some(&signature)).await,
            Ok(WebhookOutcome::Failed)
        ));
        let Ok(record) = h.store.load(id).await else {
            panic!("conversation");
        };
        assert_eq!(record.conversation.flow_state, FlowState::PaymentPending);

        let Ok(retry) = h.payments.checkout(id, h.brand).await else {
            panic!("checkout after failure");
        };
        assert_ne!(retry.id, order.id);
    }
}
