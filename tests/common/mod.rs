//! Shared setup for the integration tests.

#![allow(dead_code, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parley_gateway::api;
use parley_gateway::app_state::AppState;
use parley_gateway::config::GatewayConfig;
use parley_gateway::domain::{Actor, Binding, Command, ConversationId, Role, User, UserId};
use parley_gateway::external::{MemoryNotifier, Notifier, SandboxGateway, WebhookVerifier};
use parley_gateway::service::WebhookOutcome;
use parley_gateway::store::{ChatStore, MemoryStore};

/// Webhook secret shared with the sandbox gateway.
pub const SECRET: &str = "whsec_integration";

/// A fully wired gateway over an in-memory store.
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<MemoryNotifier>,
    pub config: GatewayConfig,
}

pub fn config() -> GatewayConfig {
    GatewayConfig {
        payment_webhook_secret: SECRET.to_string(),
        gateway_base_backoff_ms: 1,
        gateway_max_backoff_ms: 2,
        ..GatewayConfig::default()
    }
}

pub fn app() -> TestApp {
    let config = config();
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let state = AppState::build(
        &config,
        Arc::clone(&store) as Arc<dyn ChatStore>,
        Arc::new(SandboxGateway::new()),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );
    TestApp {
        state,
        store,
        notifier,
        config,
    }
}

pub async fn user(state: &AppState, role: Role, name: &str) -> UserId {
    let Ok(user) = state.chat.register_user(User::new(role, name)).await else {
        panic!("{name} registers");
    };
    user.id
}

/// Influencer applies to a campaign and the brand connects.
pub async fn connect(state: &AppState, brand: UserId, influencer: UserId) -> ConversationId {
    let Ok(request) = state
        .chat
        .apply(influencer, brand, Binding::Campaign(uuid::Uuid::new_v4()))
        .await
    else {
        panic!("influencer applies");
    };
    let Ok(opened) = state.chat.connect(request.id, brand).await else {
        panic!("brand connects");
    };
    opened.record.conversation.id
}

/// Runs a participant command that must commit.
pub async fn act(state: &AppState, id: ConversationId, user: UserId, command: Command) {
    let label = format!("{:?}", command.kind());
    if let Err(e) = state
        .chat
        .execute(id, Actor::Participant(user), command)
        .await
    {
        panic!("{label} should commit: {e}");
    }
}

/// Body and signature of a gateway webhook.
pub fn signed_webhook(gateway_order_id: &str, payment_id: &str, status: &str) -> (Vec<u8>, String) {
    let body = serde_json::json!({
        "order_id": gateway_order_id,
        "payment_id": payment_id,
        "status": status,
    })
    .to_string()
    .into_bytes();
    let Ok(signature) = WebhookVerifier::new(SECRET).sign(&body) else {
        panic!("signing works");
    };
    (body, signature)
}

/// Delivers a signed webhook through the payment service.
pub async fn deliver(state: &AppState, gateway_order_id: &str, status: &str) -> WebhookOutcome {
    let (body, signature) = signed_webhook(gateway_order_id, "pay_it", status);
    match state.payments.webhook(&body, Some(&signature)).await {
        Ok(outcome) => outcome,
        Err(e) => panic!("webhook for {gateway_order_id} failed: {e}"),
    }
}

/// Credits `amount` to `user` through a paid top-up order.
pub async fn fund(state: &AppState, user: UserId, amount: i64) {
    let Ok(order) = state.payments.top_up(user, amount).await else {
        panic!("top-up order created");
    };
    let outcome = deliver(state, &order.gateway_order_id, "paid").await;
    assert_eq!(outcome, WebhookOutcome::TopUpCredited);
}

/// Serves the full application on an ephemeral local port.
pub async fn serve(state: AppState) -> SocketAddr {
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind ephemeral port");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("local addr");
    };
    let app = api::build_app(state, Duration::from_secs(10));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}
