//! Conversation store: the one place state is written.
//!
//! [`ChatStore`] is object safe and shared as `Arc<dyn ChatStore>`.
//! [`MemoryStore`] backs tests and runs without a database;
//! [`PostgresStore`] is the durable implementation.
//!
//! Every write that touches a conversation is a compare-and-set on
//! `(flow_state, version)`. A stale writer gets
//! [`GatewayError::Conflict`] and nothing is written.

pub mod memory;
pub mod postgres;
mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::conversation::{Conversation, ConversationRecord, FlowState};
use crate::domain::ledger::{LedgerEntry, LedgerRefs, Wallet};
use crate::domain::message::{Message, NewMessage};
use crate::domain::money::Minor;
use crate::domain::payment::{OrderSettlement, PaymentOrder};
use crate::domain::request::Request;
use crate::domain::settings::SettingAudit;
use crate::domain::user::User;
use crate::domain::{ConversationId, MessageId, RequestId, UserId};
use crate::engine::TransitionPlan;
use crate::error::GatewayError;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// A planned transition ready to commit.
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// What to write.
    pub plan: TransitionPlan,
    /// Order settled by the same unit (escrow webhooks).
    pub settlement: Option<OrderSettlement>,
}

/// What a committed write produced.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Conversation after the write.
    pub conversation: Conversation,
    /// Messages appended, in order.
    pub messages: Vec<Message>,
    /// Ledger entries written (or the prior settlement on replay).
    pub ledger_entries: Vec<LedgerEntry>,
}

/// A conversation being opened.
#[derive(Debug, Clone)]
pub struct NewConversation {
    /// The row to insert.
    pub conversation: Conversation,
    /// First message, if the starting state renders one.
    pub opening: Option<NewMessage>,
}

/// Result of opening a conversation.
#[derive(Debug, Clone)]
pub struct OpenedConversation {
    /// The stored conversation (new or pre-existing).
    pub record: ConversationRecord,
    /// Messages written when it was created.
    pub messages: Vec<Message>,
    /// `false` when an existing conversation for the same pair or request
    /// was returned instead.
    pub created: bool,
}

/// Persistence boundary for the chat core.
#[async_trait]
pub trait ChatStore: Send + Sync + std::fmt::Debug {
    /// Inserts or updates a user profile.
    async fn upsert_user(&self, user: &User) -> Result<(), GatewayError>;

    /// Loads a user.
    async fn get_user(&self, id: UserId) -> Result<User, GatewayError>;

    /// Inserts a request.
    async fn insert_request(&self, request: &Request) -> Result<(), GatewayError>;

    /// Loads a request.
    async fn get_request(&self, id: RequestId) -> Result<Request, GatewayError>;

    /// Creates a conversation, or returns the existing one for the same
    /// request or, for direct chats, the same pair. Advances the request
    /// status in the same unit.
    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<OpenedConversation, GatewayError>;

    /// Loads a conversation with both participants.
    async fn load(&self, id: ConversationId) -> Result<ConversationRecord, GatewayError>;

    /// Appends a message without changing the flow state.
    async fn append_message(
        &self,
        id: ConversationId,
        expected_version: u64,
        message: NewMessage,
    ) -> Result<CommitOutcome, GatewayError>;

    /// Commits a transition atomically.
    async fn apply_transition(&self, commit: TransitionCommit)
    -> Result<CommitOutcome, GatewayError>;

    /// Unseen messages addressed to `user`.
    async fn unread_count(&self, id: ConversationId, user: UserId) -> Result<u64, GatewayError>;

    /// Most recent message.
    async fn last_message(&self, id: ConversationId) -> Result<Option<Message>, GatewayError>;

    /// Up to `limit` messages older than `before`, oldest first.
    async fn list_messages(
        &self,
        id: ConversationId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, GatewayError>;

    /// Conversations of `user` updated before `cursor`, newest first.
    async fn list_conversations(
        &self,
        user: UserId,
        cursor: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<ConversationRecord>, GatewayError>;

    /// Marks everything addressed to `reader` as seen; returns the flipped ids.
    async fn mark_seen(
        &self,
        id: ConversationId,
        reader: UserId,
    ) -> Result<Vec<MessageId>, GatewayError>;

    /// Conversations in `states` with no activity since `cutoff`.
    async fn find_idle(
        &self,
        cutoff: DateTime<Utc>,
        states: &[FlowState],
    ) -> Result<Vec<Conversation>, GatewayError>;

    /// Records the gateway order created at checkout.
    async fn set_gateway_order(
        &self,
        id: ConversationId,
        gateway_order_id: &str,
    ) -> Result<(), GatewayError>;

    /// Current balances of `user`.
    async fn wallet(&self, user: UserId) -> Result<Wallet, GatewayError>;

    /// Ledger entries of `user`, newest first.
    async fn ledger_entries(&self, user: UserId) -> Result<Vec<LedgerEntry>, GatewayError>;

    /// Moves available funds to withdrawn.
    async fn withdraw(
        &self,
        user: UserId,
        amount: Minor,
        refs: LedgerRefs,
    ) -> Result<(Wallet, LedgerEntry), GatewayError>;

    /// Inserts a gateway order.
    async fn insert_order(&self, order: &PaymentOrder) -> Result<(), GatewayError>;

    /// Looks an order up by its gateway id.
    async fn find_order(&self, gateway_order_id: &str)
    -> Result<Option<PaymentOrder>, GatewayError>;

    /// Marks an order paid and credits its amount to the payer's wallet as
    /// a deposit, in one unit. Used for top-ups and for escrow captures
    /// that arrive after their conversation moved on. Returns `None` when
    /// the order was already settled.
    async fn settle_deposit(
        &self,
        settlement: OrderSettlement,
    ) -> Result<Option<LedgerEntry>, GatewayError>;

    /// Marks an order failed. No-op for settled orders.
    async fn fail_order(&self, settlement: OrderSettlement) -> Result<(), GatewayError>;

    /// Marks an open order cancelled. No-op unless it is still `created`.
    async fn cancel_order(&self, gateway_order_id: &str) -> Result<(), GatewayError>;

    /// Reads a setting.
    async fn get_setting(&self, key: &str) -> Result<Option<String>, GatewayError>;

    /// Writes a setting and its audit row.
    async fn put_setting(
        &self,
        key: &str,
        value: &str,
        changed_by: UserId,
    ) -> Result<SettingAudit, GatewayError>;

    /// Audit trail of a setting, oldest first.
    async fn setting_history(&self, key: &str) -> Result<Vec<SettingAudit>, GatewayError>;
}
