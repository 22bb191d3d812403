//! In-process store.
//!
//! [`MemoryStore`] keeps every table in one [`State`] behind a single
//! [`tokio::sync::RwLock`]. Writers hold the write lock for the whole unit,
//! so a transition, its messages, its ledger effect and the request status
//! land together. Used when persistence is disabled and by the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    ChatStore, CommitOutcome, NewConversation, OpenedConversation, TransitionCommit,
};
use crate::domain::conversation::{Binding, Conversation, ConversationRecord, FlowState};
use crate::domain::ledger::{LedgerBook, LedgerEntry, LedgerRefs, Wallet};
use crate::domain::message::{Message, NewMessage, next_created_at};
use crate::domain::money::Minor;
use crate::domain::payment::{OrderSettlement, OrderStatus, PaymentOrder};
use crate::domain::request::{Request, RequestStatus};
use crate::domain::settings::SettingAudit;
use crate::domain::user::User;
use crate::domain::{ConversationId, MessageId, RequestId, UserId};
use crate::error::GatewayError;

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    requests: HashMap<RequestId, Request>,
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    book: LedgerBook,
    orders: Vec<PaymentOrder>,
    settings: HashMap<String, String>,
    audit: Vec<SettingAudit>,
}

impl State {
    fn conversation(&self, id: ConversationId) -> Result<&Conversation, GatewayError> {
        self.conversations
            .get(&id)
            .ok_or_else(|| GatewayError::NotFound(format!("conversation {id}")))
    }

    fn user(&self, id: UserId) -> Result<&User, GatewayError> {
        self.users
            .get(&id)
            .ok_or_else(|| GatewayError::NotFound(format!("user {id}")))
    }

    fn record(&self, conversation: &Conversation) -> Result<ConversationRecord, GatewayError> {
        Ok(ConversationRecord {
            conversation: conversation.clone(),
            brand_owner: self.user(conversation.brand_owner_id)?.clone(),
            influencer: self.user(conversation.influencer_id)?.clone(),
        })
    }

    fn push_messages(
        &mut self,
        id: ConversationId,
        new: Vec<NewMessage>,
        now: DateTime<Utc>,
    ) -> Vec<Message> {
        let log = self.messages.entry(id).or_default();
        let mut written = Vec::with_capacity(new.len());
        for message in new {
            let created_at = next_created_at(now, log.last().map(|m| m.created_at));
            let stored = message.into_message(id, created_at);
            log.push(stored.clone());
            written.push(stored);
        }
        written
    }

    fn advance_request(&mut self, request_id: Option<RequestId>, to: FlowState, now: DateTime<Utc>) {
        if let Some(request) = request_id.and_then(|id| self.requests.get_mut(&id)) {
            let status = RequestStatus::for_flow(to, request.status);
            if status != request.status {
                request.status = status;
                request.updated_at = now;
            }
        }
    }

    fn existing_for(&self, new: &Conversation) -> Option<&Conversation> {
        self.conversations.values().find(|c| match new.request_id {
            Some(request_id) => c.request_id == Some(request_id),
            None => {
                new.binding == Binding::Direct
                    && c.binding == Binding::Direct
                    && c.is_participant(new.brand_owner_id)
                    && c.is_participant(new.influencer_id)
            }
        })
    }

    fn order_mut(&mut self, settlement: &OrderSettlement) -> Result<&mut PaymentOrder, GatewayError> {
        self.orders
            .iter_mut()
            .find(|o| o.id == settlement.order_id)
            .ok_or_else(|| GatewayError::NotFound(format!("order {}", settlement.order_id)))
    }
}

/// Store backed by in-process maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all wallet totals and of completed deposits, for conservation
    /// checks.
    pub async fn money_totals(&self) -> (Minor, Minor) {
        let state = self.state.read().await;
        let wallets = state.book.wallets().map(Wallet::total).sum();
        (wallets, state.book.completed_deposits())
    }

    /// Credits a deposit directly, bypassing gateway orders.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidAmount`] for non-positive amounts.
    pub async fn deposit(&self, user: UserId, amount: Minor) -> Result<LedgerEntry, GatewayError> {
        let mut state = self.state.write().await;
        state.book.deposit(user, amount, LedgerRefs::default(), Utc::now())
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn upsert_user(&self, user: &User) -> Result<(), GatewayError> {
        self.state.write().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<User, GatewayError> {
        self.state.read().await.user(id).cloned()
    }

    async fn insert_request(&self, request: &Request) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        if state.requests.contains_key(&request.id) {
            return Err(GatewayError::InvalidRequest(format!(
                "request {} already exists",
                request.id
            )));
        }
        state.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: RequestId) -> Result<Request, GatewayError> {
        self.state
            .read()
            .await
            .requests
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("request {id}")))
    }

    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<OpenedConversation, GatewayError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.existing_for(&new.conversation) {
            let record = state.record(existing)?;
            return Ok(OpenedConversation {
                record,
                messages: Vec::new(),
                created: false,
            });
        }

        let conversation = new.conversation;
        let record = state.record(&conversation)?;
        let now = Utc::now();
        let id = conversation.id;
        let request_id = conversation.request_id;
        let start = conversation.flow_state;
        state.conversations.insert(id, conversation);
        let messages = state.push_messages(id, new.opening.into_iter().collect(), now);
        state.advance_request(request_id, start, now);
        Ok(OpenedConversation {
            record,
            messages,
            created: true,
        })
    }

    async fn load(&self, id: ConversationId) -> Result<ConversationRecord, GatewayError> {
        let state = self.state.read().await;
        let conversation = state.conversation(id)?;
        state.record(conversation)
    }

    async fn append_message(
        &self,
        id: ConversationId,
        expected_version: u64,
        message: NewMessage,
    ) -> Result<CommitOutcome, GatewayError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let current = state.conversation(id)?.clone();
        if current.version != expected_version {
            return Err(GatewayError::Conflict {
                current: current.flow_state,
            });
        }
        let messages = state.push_messages(id, vec![message], now);
        let conversation = Conversation {
            version: current.version + 1,
            updated_at: now,
            last_activity_at: now,
            ..current
        };
        state.conversations.insert(id, conversation.clone());
        Ok(CommitOutcome {
            conversation,
            messages,
            ledger_entries: Vec::new(),
        })
    }

    async fn apply_transition(
        &self,
        commit: TransitionCommit,
    ) -> Result<CommitOutcome, GatewayError> {
        let TransitionCommit {
            conversation_id: id,
            plan,
            settlement,
        } = commit;
        let mut state = self.state.write().await;
        let now = Utc::now();

        let current = state.conversation(id)?.clone();
        if current.flow_state != plan.from || current.version != plan.expected_version {
            return Err(GatewayError::Conflict {
                current: current.flow_state,
            });
        }
        if let Some(settlement) = &settlement
            && state.order_mut(settlement)?.status.is_final()
        {
            return Err(GatewayError::Conflict {
                current: current.flow_state,
            });
        }

        // The only fallible step; it leaves the book untouched on error.
        let ledger_entries = state.book.apply_effect(&plan.ledger, now)?;

        let conversation = plan.patch.apply(&current, now);
        state.conversations.insert(id, conversation.clone());
        let messages = state.push_messages(id, plan.messages, now);
        state.advance_request(conversation.request_id, conversation.flow_state, now);
        if let Some(settlement) = settlement
            && let Ok(order) = state.order_mut(&settlement)
        {
            order.status = settlement.status;
            order.gateway_payment_id = Some(settlement.gateway_payment_id);
            order.updated_at = now;
        }

        Ok(CommitOutcome {
            conversation,
            messages,
            ledger_entries,
        })
    }

    async fn unread_count(&self, id: ConversationId, user: UserId) -> Result<u64, GatewayError> {
        let state = self.state.read().await;
        let count = state
            .messages
            .get(&id)
            .map_or(0, |log| log.iter().filter(|m| m.receiver_id == user && !m.seen).count());
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn last_message(&self, id: ConversationId) -> Result<Option<Message>, GatewayError> {
        let state = self.state.read().await;
        Ok(state.messages.get(&id).and_then(|log| log.last().cloned()))
    }

    async fn list_messages(
        &self,
        id: ConversationId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, GatewayError> {
        let state = self.state.read().await;
        state.conversation(id)?;
        let Some(log) = state.messages.get(&id) else {
            return Ok(Vec::new());
        };
        let mut page: Vec<Message> = log
            .iter()
            .rev()
            .filter(|m| before.is_none_or(|b| m.created_at < b))
            .take(limit as usize)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }

    async fn list_conversations(
        &self,
        user: UserId,
        cursor: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<ConversationRecord>, GatewayError> {
        let state = self.state.read().await;
        let mut mine: Vec<&Conversation> = state
            .conversations
            .values()
            .filter(|c| c.is_participant(user))
            .filter(|c| cursor.is_none_or(|at| c.updated_at < at))
            .collect();
        mine.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        mine.into_iter()
            .take(limit as usize)
            .map(|c| state.record(c))
            .collect()
    }

    async fn mark_seen(
        &self,
        id: ConversationId,
        reader: UserId,
    ) -> Result<Vec<MessageId>, GatewayError> {
        let mut state = self.state.write().await;
        state.conversation(id)?;
        let mut flipped = Vec::new();
        if let Some(log) = state.messages.get_mut(&id) {
            for message in log.iter_mut().filter(|m| m.receiver_id == reader && !m.seen) {
                message.seen = true;
                flipped.push(message.id);
            }
        }
        Ok(flipped)
    }

    async fn find_idle(
        &self,
        cutoff: DateTime<Utc>,
        states: &[FlowState],
    ) -> Result<Vec<Conversation>, GatewayError> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .values()
            .filter(|c| states.contains(&c.flow_state) && c.last_activity_at < cutoff)
            .cloned()
            .collect())
    }

    async fn set_gateway_order(
        &self,
        id: ConversationId,
        gateway_order_id: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .get_mut(&id)
            .ok_or_else(|| GatewayError::NotFound(format!("conversation {id}")))?;
        conversation.gateway_order_id = Some(gateway_order_id.to_string());
        Ok(())
    }

    async fn wallet(&self, user: UserId) -> Result<Wallet, GatewayError> {
        Ok(self.state.read().await.book.wallet(user))
    }

    async fn ledger_entries(&self, user: UserId) -> Result<Vec<LedgerEntry>, GatewayError> {
        Ok(self.state.read().await.book.entries_for(user))
    }

    async fn withdraw(
        &self,
        user: UserId,
        amount: Minor,
        refs: LedgerRefs,
    ) -> Result<(Wallet, LedgerEntry), GatewayError> {
        let mut state = self.state.write().await;
        let entry = state.book.withdraw(user, amount, refs, Utc::now())?;
        Ok((state.book.wallet(user), entry))
    }

    async fn insert_order(&self, order: &PaymentOrder) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        if state
            .orders
            .iter()
            .any(|o| o.gateway_order_id == order.gateway_order_id)
        {
            return Err(GatewayError::InvalidRequest(format!(
                "gateway order {} already recorded",
                order.gateway_order_id
            )));
        }
        state.orders.push(order.clone());
        Ok(())
    }

    async fn find_order(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<PaymentOrder>, GatewayError> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .iter()
            .find(|o| o.gateway_order_id == gateway_order_id)
            .cloned())
    }

    async fn settle_deposit(
        &self,
        settlement: OrderSettlement,
    ) -> Result<Option<LedgerEntry>, GatewayError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let order = state.order_mut(&settlement)?.clone();
        if order.status.is_final() {
            return Ok(None);
        }
        let refs = LedgerRefs {
            conversation_id: order.purpose.columns().1,
            gateway_payment_id: Some(settlement.gateway_payment_id.clone()),
            ..LedgerRefs::default()
        };
        let entry = state
            .book
            .deposit(order.user_id, order.amount_minor, refs, now)?;
        let order = state.order_mut(&settlement)?;
        order.status = OrderStatus::Paid;
        order.gateway_payment_id = Some(settlement.gateway_payment_id);
        order.updated_at = now;
        Ok(Some(entry))
    }

    async fn fail_order(&self, settlement: OrderSettlement) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        let order = state.order_mut(&settlement)?;
        if !order.status.is_final() {
            order.status = OrderStatus::Failed;
            order.gateway_payment_id = Some(settlement.gateway_payment_id);
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn cancel_order(&self, gateway_order_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        if let Some(order) = state
            .orders
            .iter_mut()
            .find(|o| o.gateway_order_id == gateway_order_id && o.status == OrderStatus::Created)
        {
            order.status = OrderStatus::Cancelled;
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, GatewayError> {
        Ok(self.state.read().await.settings.get(key).cloned())
    }

    async fn put_setting(
        &self,
        key: &str,
        value: &str,
        changed_by: UserId,
    ) -> Result<SettingAudit, GatewayError> {
        let mut state = self.state.write().await;
        let old_value = state.settings.insert(key.to_string(), value.to_string());
        let audit = SettingAudit {
            key: key.to_string(),
            old_value,
            new_value: value.to_string(),
            changed_by,
            changed_at: Utc::now(),
        };
        state.audit.push(audit.clone());
        Ok(audit)
    }

    async fn setting_history(&self, key: &str) -> Result<Vec<SettingAudit>, GatewayError> {
        let state = self.state.read().await;
        Ok(state.audit.iter().filter(|a| a.key == key).cloned().collect())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::command::{Actor, Command};
    use crate::domain::message::{MessageBody, MessageType};
    use crate::domain::user::Role;
    use crate::engine::{FlowPolicy, plan};

    async fn seeded(start: FlowState) -> (MemoryStore, ConversationRecord) {
        let store = MemoryStore::new();
        let brand = User::new(Role::BrandOwner, "Acme");
        let influencer = User::new(Role::Influencer, "Asha");
        let Ok(()) = store.upsert_user(&brand).await else {
            panic!("user insert");
        };
        let Ok(()) = store.upsert_user(&influencer).await else {
            panic!("user insert");
        };
        let Ok(conversation) =
            Conversation::new(brand.id, influencer.id, Binding::Direct, None, start)
        else {
            panic!("valid conversation");
        };
        let Ok(opened) = store
            .create_conversation(NewConversation {
                conversation,
                opening: None,
            })
            .await
        else {
            panic!("conversation insert");
        };
        (store, opened.record)
    }

    fn commit_for(record: &ConversationRecord, actor: Actor, command: Command) -> TransitionCommit {
        let Ok(plan) = plan(&record.conversation, actor, &command, &FlowPolicy::default()) else {
            panic!("legal command");
        };
        TransitionCommit {
            conversation_id: record.conversation.id,
            plan,
            settlement: None,
        }
    }

    #[tokio::test]
    async fn stale_version_conflicts_and_writes_nothing() {
        let (store, record) = seeded(FlowState::InitialOffer).await;
        let brand = Actor::Participant(record.brand_owner.id);
        let first = commit_for(&record, brand, Command::SendPriceOffer { amount: 1_000 });
        let second = commit_for(&record, brand, Command::SendPriceOffer { amount: 2_000 });

        let Ok(outcome) = store.apply_transition(first).await else {
            panic!("first commit wins");
        };
        assert_eq!(outcome.conversation.version, 1);

        let result = store.apply_transition(second).await;
        assert!(matches!(
            result,
            Err(GatewayError::Conflict {
                current: FlowState::InfluencerPriceResponse
            })
        ));
        let Ok(reloaded) = store.load(record.conversation.id).await else {
            panic!("load");
        };
        assert_eq!(reloaded.conversation.pending_offer, Some(1_000));
        let Ok(page) = store.list_messages(record.conversation.id, None, 50).await else {
            panic!("list");
        };
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn failed_ledger_effect_rolls_back_the_whole_unit() {
        let (store, mut record) = seeded(FlowState::WorkSubmitted).await;
        record.conversation.final_agreed_amount = Some(300_000);
        record.conversation.escrow_hold_id = Some(crate::domain::LedgerEntryId::new());
        {
            let mut state = store.state.write().await;
            state
                .conversations
                .insert(record.conversation.id, record.conversation.clone());
        }
        let commit = commit_for(
            &record,
            Actor::Participant(record.brand_owner.id),
            Command::ApproveWork,
        );
        let result = store.apply_transition(commit).await;
        assert!(matches!(result, Err(GatewayError::InvariantViolation(_))));
        let Ok(reloaded) = store.load(record.conversation.id).await else {
            panic!("load");
        };
        assert_eq!(reloaded.conversation.flow_state, FlowState::WorkSubmitted);
        assert_eq!(reloaded.conversation.version, 0);
        let Ok(None) = store.last_message(record.conversation.id).await else {
            panic!("no message should be written");
        };
    }

    #[tokio::test]
    async fn payment_confirmation_funds_an_empty_wallet() {
        let (store, mut record) = seeded(FlowState::PaymentPending).await;
        record.conversation.final_agreed_amount = Some(300_000);
        {
            let mut state = store.state.write().await;
            state
                .conversations
                .insert(record.conversation.id, record.conversation.clone());
        }
        let commit = commit_for(
            &record,
            Actor::System,
            Command::PaymentConfirmed {
                gateway_payment_id: "pay_1".into(),
            },
        );
        let Ok(outcome) = store.apply_transition(commit).await else {
            panic!("a captured payment always funds the escrow");
        };
        assert_eq!(outcome.conversation.flow_state, FlowState::PaymentCompleted);
        assert_eq!(outcome.ledger_entries.len(), 2);
        let Ok(wallet) = store.wallet(record.brand_owner.id).await else {
            panic!("wallet");
        };
        assert_eq!((wallet.available, wallet.frozen), (0, 300_000));
        assert_eq!(store.money_totals().await, (300_000, 300_000));
    }

    #[tokio::test]
    async fn created_at_is_strictly_increasing() {
        let (store, record) = seeded(FlowState::RealTime).await;
        let id = record.conversation.id;
        let mut version = 0;
        for i in 0..5 {
            let message = NewMessage::new(
                record.brand_owner.id,
                record.influencer.id,
                MessageBody::text(format!("m{i}")),
                MessageType::UserInput,
            );
            let Ok(outcome) = store.append_message(id, version, message).await else {
                panic!("append");
            };
            version = outcome.conversation.version;
        }
        let Ok(page) = store.list_messages(id, None, 10).await else {
            panic!("list");
        };
        assert_eq!(page.len(), 5);
        assert!(page.windows(2).all(|w| match w {
            [a, b] => a.created_at < b.created_at,
            _ => true,
        }));
    }

    #[tokio::test]
    async fn mark_seen_flips_only_inbound_messages() {
        let (store, record) = seeded(FlowState::RealTime).await;
        let id = record.conversation.id;
        let to_influencer = NewMessage::new(
            record.brand_owner.id,
            record.influencer.id,
            MessageBody::text("hello"),
            MessageType::UserInput,
        );
        let Ok(_) = store.append_message(id, 0, to_influencer).await else {
            panic!("append");
        };
        let Ok(flipped) = store.mark_seen(id, record.brand_owner.id).await else {
            panic!("mark seen");
        };
        assert!(flipped.is_empty());
        assert_eq!(store.unread_count(id, record.influencer.id).await.ok(), Some(1));
        let Ok(flipped) = store.mark_seen(id, record.influencer.id).await else {
            panic!("mark seen");
        };
        assert_eq!(flipped.len(), 1);
        assert_eq!(store.unread_count(id, record.influencer.id).await.ok(), Some(0));
    }

    #[tokio::test]
    async fn direct_chats_are_unique_per_pair() {
        let (store, record) = seeded(FlowState::RealTime).await;
        let Ok(again) = Conversation::new(
            record.influencer.id,
            record.brand_owner.id,
            Binding::Direct,
            None,
            FlowState::RealTime,
        ) else {
            panic!("valid conversation");
        };
        let Ok(opened) = store
            .create_conversation(NewConversation {
                conversation: again,
                opening: None,
            })
            .await
        else {
            panic!("open");
        };
        assert!(!opened.created);
        assert_eq!(opened.record.conversation.id, record.conversation.id);
    }

    #[tokio::test]
    async fn settings_keep_an_audit_trail() {
        let store = MemoryStore::new();
        let admin = UserId::new();
        let Ok(_) = store.put_setting("commission_rate_pct", "10", admin).await else {
            panic!("put");
        };
        let Ok(audit) = store.put_setting("commission_rate_pct", "12.5", admin).await else {
            panic!("put");
        };
        assert_eq!(audit.old_value.as_deref(), Some("10"));
        let Ok(history) = store.setting_history("commission_rate_pct").await else {
            panic!("history");
        };
        assert_eq!(history.len(), 2);
    }
}
