//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::api::dto::{CommandResponse, SendMessageRequest};
use crate::config::GatewayConfig;
use crate::domain::view::MessageView;
use crate::domain::{ConversationId, EventBus, UserId};
use crate::error::GatewayError;
use crate::external::{Notifier, PaymentGateway, WebhookVerifier};
use crate::service::{
    ButtonOutcome, ChatService, Committed, FanoutDispatcher, PaymentService, SettingsHolder,
    SettingsService, WalletService,
};
use crate::store::ChatStore;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Conversations and messages.
    pub chat: ChatService,
    /// Checkout, top-ups and the webhook.
    pub payments: PaymentService,
    /// Balances and withdrawals.
    pub wallets: WalletService,
    /// Audited platform settings.
    pub settings: SettingsService,
    /// Event bus for WebSocket subscriptions.
    pub event_bus: EventBus,
}

impl AppState {
    /// Wires every service over `store` and starts the fan-out
    /// dispatcher.
    #[must_use]
    pub fn build(
        config: &GatewayConfig,
        store: Arc<dyn ChatStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity);
        let (outbox, _dispatcher) = FanoutDispatcher::spawn(Arc::clone(&store), event_bus.clone());
        let holder = SettingsHolder::new(Arc::clone(&store), config.default_commission);
        let chat = ChatService::new(
            Arc::clone(&store),
            outbox,
            event_bus.clone(),
            holder.clone(),
            notifier,
            config.flow_policy(),
        );
        let payments = PaymentService::new(
            chat.clone(),
            Arc::clone(&gateway),
            WebhookVerifier::new(config.payment_webhook_secret.as_bytes()),
            config.retry_policy(),
            config.currency.clone(),
        );
        let wallets = WalletService::new(
            Arc::clone(&store),
            gateway,
            config.retry_policy(),
            config.currency.clone(),
            config.amount_limits(),
        );
        let settings = SettingsService::new(store, holder);
        Self {
            chat,
            payments,
            wallets,
            settings,
            event_bus,
        }
    }

    /// Renders a commit for `viewer`.
    ///
    /// # Errors
    ///
    /// Store failures while building the view.
    pub async fn command_response(
        &self,
        committed: Committed,
        viewer: UserId,
    ) -> Result<CommandResponse, GatewayError> {
        let conversation = self.chat.view_of(&committed.record, viewer).await?;
        Ok(CommandResponse {
            conversation,
            messages: committed.messages.iter().map(MessageView::from).collect(),
            checkout: None,
        })
    }

    /// Handles a composer submission from HTTP or the socket.
    ///
    /// # Errors
    ///
    /// Whatever the chat service returns.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        user: UserId,
        request: SendMessageRequest,
    ) -> Result<CommandResponse, GatewayError> {
        let input = request.into_input()?;
        let committed = self.chat.send_message(conversation_id, user, input).await?;
        self.command_response(committed, user).await
    }

    /// Handles a button click from HTTP or the socket. The payment button
    /// creates the checkout order instead of a transition.
    ///
    /// # Errors
    ///
    /// Whatever the chat or payment service returns.
    pub async fn click_button(
        &self,
        conversation_id: ConversationId,
        user: UserId,
        button_id: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<CommandResponse, GatewayError> {
        match self
            .chat
            .button_click(conversation_id, user, button_id, payload)
            .await?
        {
            ButtonOutcome::Committed(committed) => self.command_response(committed, user).await,
            ButtonOutcome::Checkout => {
                let order = self.payments.checkout(conversation_id, user).await?;
                let conversation = self.chat.view(conversation_id, user).await?;
                Ok(CommandResponse {
                    conversation,
                    messages: Vec::new(),
                    checkout: Some(order.into()),
                })
            }
        }
    }
}
