//! Service layer: business logic orchestration.
//!
//! [`ChatService`] is the single write path for conversations. It plans
//! through the engine, commits through the store and hands every commit to
//! the fan-out [`Outbox`]. Payments, wallets, settings and the idle
//! sweeper sit around it and reach conversations only through it.

pub mod chat_service;
pub mod fanout;
pub mod payment_service;
pub mod settings_service;
pub mod sweep;
pub mod wallet_service;

pub use chat_service::{ButtonOutcome, ChatService, Committed, MAX_PAGE, MessageInput};
pub use fanout::{CommitNotice, FanoutDispatcher, Outbox};
pub use payment_service::{PaymentService, WebhookOutcome, WebhookPayload, WebhookStatus};
pub use settings_service::{SettingsHolder, SettingsService, SettingsSnapshot};
pub use sweep::{IdleSweeper, SweepReport};
pub use wallet_service::{WalletService, Withdrawal};
