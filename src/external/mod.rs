//! Collaborators outside the chat core: the payment gateway, user
//! notifications, webhook signature checks and the retry policy used
//! around gateway calls.

pub mod notifier;
pub mod payment_gateway;
pub mod retry;
pub mod webhook;

pub use notifier::{LogNotifier, MemoryNotifier, Notification, Notifier};
pub use payment_gateway::{
    GatewayOrder, OrderRequest, PaymentGateway, PayoutReceipt, PayoutRequest, SandboxGateway,
};
pub use retry::RetryPolicy;
pub use webhook::{SIGNATURE_HEADER, WebhookVerifier};
