//! Chat service: the single write path for conversations.
//!
//! Every input, whether an HTTP call, a socket command, a webhook or the
//! idle sweeper, ends up in [`ChatService`]. It loads the conversation,
//! asks the engine for a plan, hands the plan to the store and enqueues a
//! fan-out notice. The commit and the enqueue run together on a detached
//! task, so a caller that disconnects mid-request cannot commit a write
//! without its notice.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::fanout::{CommitNotice, Outbox};
use super::settings_service::SettingsHolder;
use crate::domain::action::{self, ButtonIntent};
use crate::domain::chat_event::{ChatEvent, UnreadAction};
use crate::domain::command::{Actor, Command, CommandKind};
use crate::domain::conversation::{Binding, Conversation, ConversationRecord, FlowState};
use crate::domain::ledger::LedgerEntry;
use crate::domain::message::{Message, MessageBody, MessageType, NewMessage};
use crate::domain::payment::OrderSettlement;
use crate::domain::request::Request;
use crate::domain::user::{Role, User};
use crate::domain::view::ConversationView;
use crate::domain::{ConversationId, EventBus, MessageId, RequestId, UserId};
use crate::engine::{self, FlowPolicy};
use crate::error::GatewayError;
use crate::external::{Notification, Notifier};
use crate::store::{
    ChatStore, CommitOutcome, NewConversation, OpenedConversation, TransitionCommit,
};

/// Largest page the list endpoints return.
pub const MAX_PAGE: u32 = 100;

/// What a participant typed or clicked in the message composer.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageInput {
    /// Free text (only legal in `real_time`).
    Text(String),
    /// A structured response to the current action.
    Action {
        /// Command kind, e.g. `negotiate_price`.
        action: String,
        /// Loose payload carrying the amount, note or attachments.
        payload: Option<serde_json::Value>,
    },
}

/// Everything a command (and its follow-ups) committed.
#[derive(Debug, Clone)]
pub struct Committed {
    /// Conversation after the last commit, with both profiles.
    pub record: ConversationRecord,
    /// Messages appended, in order.
    pub messages: Vec<Message>,
    /// Ledger entries written.
    pub ledger_entries: Vec<LedgerEntry>,
}

/// Result of a button click.
#[derive(Debug, Clone)]
pub enum ButtonOutcome {
    /// The click ran a transition.
    Committed(Committed),
    /// The click asks for a gateway checkout.
    Checkout,
}

/// Orchestrates conversations.
#[derive(Debug, Clone)]
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    outbox: Outbox,
    bus: EventBus,
    settings: SettingsHolder,
    notifier: Arc<dyn Notifier>,
    policy: FlowPolicy,
}

impl ChatService {
    /// Creates the service. `policy.commission` is only a fallback; the
    /// live rate comes from `settings`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ChatStore>,
        outbox: Outbox,
        bus: EventBus,
        settings: SettingsHolder,
        notifier: Arc<dyn Notifier>,
        policy: FlowPolicy,
    ) -> Self {
        Self {
            store,
            outbox,
            bus,
            settings,
            notifier,
            policy,
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    /// Static flow tunables.
    #[must_use]
    pub const fn policy(&self) -> &FlowPolicy {
        &self.policy
    }

    /// Registers or refreshes a user profile.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] for reserved ids or an empty name.
    pub async fn register_user(&self, user: User) -> Result<User, GatewayError> {
        if user.id.is_reserved() {
            return Err(GatewayError::InvalidRequest(format!(
                "user id {} is reserved",
                user.id
            )));
        }
        if user.display_name.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "display_name must not be empty".to_string(),
            ));
        }
        self.store.upsert_user(&user).await?;
        tracing::info!(user_id = %user.id, role = %user.role, "user registered");
        Ok(user)
    }

    /// Loads a user.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] for unknown users.
    pub async fn user(&self, id: UserId) -> Result<User, GatewayError> {
        self.store.get_user(id).await
    }

    /// An influencer applies to a brand owner's campaign or bid.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Forbidden`] if the caller is not an influencer.
    /// - [`GatewayError::InvalidRequest`] if the target is not a brand owner
    ///   or the binding is direct.
    pub async fn apply(
        &self,
        influencer_id: UserId,
        brand_owner_id: UserId,
        binding: Binding,
    ) -> Result<Request, GatewayError> {
        let influencer = self.store.get_user(influencer_id).await?;
        if influencer.role != Role::Influencer {
            return Err(GatewayError::Forbidden(
                "only influencers can apply".to_string(),
            ));
        }
        let brand = self.store.get_user(brand_owner_id).await?;
        if brand.role != Role::BrandOwner {
            return Err(GatewayError::InvalidRequest(format!(
                "user {brand_owner_id} is not a brand owner"
            )));
        }
        let request = Request::apply(influencer_id, brand_owner_id, binding)?;
        self.store.insert_request(&request).await?;
        tracing::info!(request_id = %request.id, %influencer_id, %brand_owner_id, "request applied");
        Ok(request)
    }

    /// The brand owner connects to a request, opening its conversation in
    /// `initial_offer`. Connecting twice returns the same conversation.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] if the caller does not own the request.
    pub async fn connect(
        &self,
        request_id: RequestId,
        caller: UserId,
    ) -> Result<OpenedConversation, GatewayError> {
        let request = self.store.get_request(request_id).await?;
        if request.brand_owner_id != caller {
            return Err(GatewayError::Forbidden(format!(
                "request {request_id} belongs to another brand owner"
            )));
        }
        let conversation = Conversation::new(
            request.brand_owner_id,
            request.influencer_id,
            request.binding,
            Some(request.id),
            FlowState::InitialOffer,
        )?;
        let opening = engine::opening_message(&conversation, self.policy.max_rounds);
        let opened = self
            .open(NewConversation {
                conversation,
                opening,
            })
            .await?;
        if opened.created {
            self.notify(
                request.influencer_id,
                Notification::Connected {
                    conversation_id: opened.record.conversation.id,
                },
            );
        }
        Ok(opened)
    }

    /// Opens (or returns) the direct chat between `caller` and `other`.
    /// Direct chats skip negotiation and start in `real_time`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] when chatting with oneself or a
    /// reserved user.
    pub async fn open_direct(
        &self,
        caller: UserId,
        other: UserId,
    ) -> Result<OpenedConversation, GatewayError> {
        if caller == other || other.is_reserved() {
            return Err(GatewayError::InvalidRequest(
                "a direct chat needs another user".to_string(),
            ));
        }
        let me = self.store.get_user(caller).await?;
        let them = self.store.get_user(other).await?;
        let (brand, influencer) = if me.role == Role::Influencer {
            (them.id, me.id)
        } else {
            (me.id, them.id)
        };
        let conversation =
            Conversation::new(brand, influencer, Binding::Direct, None, FlowState::RealTime)?;
        let opening = engine::opening_message(&conversation, self.policy.max_rounds);
        self.open(NewConversation {
            conversation,
            opening,
        })
        .await
    }

    async fn open(&self, new: NewConversation) -> Result<OpenedConversation, GatewayError> {
        let store = Arc::clone(&self.store);
        let outbox = self.outbox.clone();
        let opened = tokio::spawn(async move {
            let opened = store.create_conversation(new).await?;
            if opened.created {
                outbox.enqueue(CommitNotice {
                    conversation: opened.record.conversation.clone(),
                    messages: opened.messages.clone(),
                });
            }
            Ok::<_, GatewayError>(opened)
        })
        .await
        .map_err(|e| GatewayError::Internal(format!("open task failed: {e}")))??;
        let conversation = &opened.record.conversation;
        tracing::info!(
            conversation_id = %conversation.id,
            flow_state = %conversation.flow_state,
            created = opened.created,
            "conversation opened"
        );
        Ok(opened)
    }

    /// Runs a participant or system command.
    ///
    /// # Errors
    ///
    /// Guard failures from the engine, [`GatewayError::Conflict`] when the
    /// conversation moved on, and ledger errors from the store.
    pub async fn execute(
        &self,
        conversation_id: ConversationId,
        actor: Actor,
        command: Command,
    ) -> Result<Committed, GatewayError> {
        let record = self.store.load(conversation_id).await?;
        self.run(record, actor, command, None).await
    }

    /// Runs `payment_confirmed` and settles the escrow order in the same
    /// unit.
    ///
    /// # Errors
    ///
    /// As [`Self::execute`]. The captured amount funds the hold, so the
    /// payer's balance never blocks it.
    pub async fn confirm_payment(
        &self,
        conversation_id: ConversationId,
        settlement: OrderSettlement,
    ) -> Result<Committed, GatewayError> {
        let record = self.store.load(conversation_id).await?;
        let command = Command::PaymentConfirmed {
            gateway_payment_id: settlement.gateway_payment_id.clone(),
        };
        self.run(record, Actor::System, command, Some(settlement))
            .await
    }

    /// Times out an idle conversation, planning against the snapshot the
    /// sweeper saw so that any activity since makes the write conflict.
    /// An open checkout order is cancelled afterwards.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Conflict`] if the conversation changed.
    pub async fn expire(&self, idle: Conversation) -> Result<Committed, GatewayError> {
        let stored = self.store.load(idle.id).await?;
        let open_order = idle.gateway_order_id.clone();
        let record = ConversationRecord {
            conversation: idle,
            ..stored
        };
        let committed = self.run(record, Actor::System, Command::Timeout, None).await?;
        if let Some(gateway_order_id) = open_order
            && let Err(e) = self.store.cancel_order(&gateway_order_id).await
        {
            tracing::warn!(
                conversation_id = %committed.record.conversation.id,
                %gateway_order_id,
                error = %e,
                "open order not cancelled"
            );
        }
        Ok(committed)
    }

    /// Finishes a conversation left in a state the system moves on from,
    /// planning against the snapshot like [`Self::expire`].
    ///
    /// # Errors
    ///
    /// [`GatewayError::IllegalTransition`] when the state has nothing to
    /// resume and [`GatewayError::Conflict`] if the conversation changed.
    pub async fn resume(&self, stalled: Conversation) -> Result<Committed, GatewayError> {
        let command = match stalled.flow_state {
            FlowState::WorkApproved => Command::OpenChat,
            other => {
                return Err(GatewayError::IllegalTransition(format!(
                    "nothing to resume in {other}"
                )));
            }
        };
        let stored = self.store.load(stalled.id).await?;
        let record = ConversationRecord {
            conversation: stalled,
            ..stored
        };
        self.run(record, Actor::System, command, None).await
    }

    /// Handles a composer submission.
    ///
    /// # Errors
    ///
    /// As [`Self::execute`]; [`GatewayError::IllegalTransition`] for an
    /// unknown action.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        sender: UserId,
        input: MessageInput,
    ) -> Result<Committed, GatewayError> {
        let command = match input {
            MessageInput::Text(body) => Command::SendText { body },
            MessageInput::Action { action, payload } => {
                let kind: CommandKind = action.parse()?;
                action::command_from_payload(kind, payload.as_ref())?
            }
        };
        self.execute(conversation_id, Actor::Participant(sender), command)
            .await
    }

    /// Resolves a button click server-side and runs it.
    ///
    /// The command comes from the button id alone; only the field it needs
    /// is read from `payload`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-participants,
    /// [`GatewayError::IllegalTransition`] for a button not rendered now and
    /// [`GatewayError::RoleMismatch`] for the other side's button.
    pub async fn button_click(
        &self,
        conversation_id: ConversationId,
        user: UserId,
        button_id: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<ButtonOutcome, GatewayError> {
        let record = self.store.load(conversation_id).await?;
        let role = record
            .conversation
            .role_of(user)
            .ok_or_else(|| not_participant(user, conversation_id))?;
        let intent = action::resolve_button(
            &record.conversation,
            self.policy.max_rounds,
            role,
            button_id,
            payload,
        )?;
        tracing::debug!(%conversation_id, user_id = %user, button_id, "button resolved");
        match intent {
            ButtonIntent::Checkout => Ok(ButtonOutcome::Checkout),
            ButtonIntent::Command(command) => self
                .run(record, Actor::Participant(user), command, None)
                .await
                .map(ButtonOutcome::Committed),
        }
    }

    /// Appends a platform notice without changing the flow state.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Conflict`] if the conversation changed while writing.
    pub async fn post_notice(
        &self,
        conversation_id: ConversationId,
        to: UserId,
        text: &str,
    ) -> Result<Message, GatewayError> {
        let record = self.store.load(conversation_id).await?;
        let message = NewMessage::new(
            UserId::SYSTEM,
            to,
            MessageBody::text(text),
            MessageType::System,
        );
        let store = Arc::clone(&self.store);
        let outbox = self.outbox.clone();
        let version = record.conversation.version;
        let outcome = tokio::spawn(async move {
            let outcome = store
                .append_message(conversation_id, version, message)
                .await?;
            outbox.enqueue(CommitNotice {
                conversation: outcome.conversation.clone(),
                messages: outcome.messages.clone(),
            });
            Ok::<_, GatewayError>(outcome)
        })
        .await
        .map_err(|e| GatewayError::Internal(format!("notice task failed: {e}")))??;
        outcome
            .messages
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Internal("notice was not written".to_string()))
    }

    /// Marks inbound messages seen and tells both sides.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-participants.
    pub async fn mark_seen(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<Vec<MessageId>, GatewayError> {
        let record = self.store.load(conversation_id).await?;
        let conversation = &record.conversation;
        if !conversation.is_participant(reader) {
            return Err(not_participant(reader, conversation_id));
        }
        let message_ids = self.store.mark_seen(conversation_id, reader).await?;
        if !message_ids.is_empty() {
            let seen = ChatEvent::MessageSeen {
                conversation_id,
                message_ids: message_ids.clone(),
                seen_by: reader,
                timestamp: Utc::now(),
            };
            for participant in conversation.participants() {
                self.bus.publish_to(participant, seen.clone());
            }
        }
        self.bus.publish_to(
            reader,
            ChatEvent::UnreadCountUpdated {
                conversation_id,
                unread_count: 0,
                action: UnreadAction::Reset,
            },
        );
        tracing::debug!(%conversation_id, user_id = %reader, seen = message_ids.len(), "messages seen");
        Ok(message_ids)
    }

    /// The list entry of one conversation for `viewer`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-participants.
    pub async fn view(
        &self,
        conversation_id: ConversationId,
        viewer: UserId,
    ) -> Result<ConversationView, GatewayError> {
        let record = self.store.load(conversation_id).await?;
        if !record.conversation.is_participant(viewer) {
            return Err(not_participant(viewer, conversation_id));
        }
        self.view_of(&record, viewer).await
    }

    /// Builds the view of `record` for `viewer` with live unread count.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn view_of(
        &self,
        record: &ConversationRecord,
        viewer: UserId,
    ) -> Result<ConversationView, GatewayError> {
        let id = record.conversation.id;
        let unread = self.store.unread_count(id, viewer).await?;
        let last = self.store.last_message(id).await?;
        Ok(ConversationView::for_user(record, viewer, unread, last.as_ref()))
    }

    /// Conversations of `user`, newest first.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn list(
        &self,
        user: UserId,
        cursor: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<ConversationView>, GatewayError> {
        let records = self
            .store
            .list_conversations(user, cursor, limit.clamp(1, MAX_PAGE))
            .await?;
        let mut views = Vec::with_capacity(records.len());
        for record in &records {
            views.push(self.view_of(record, user).await?);
        }
        Ok(views)
    }

    /// Message history, oldest first.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Forbidden`] for non-participants.
    pub async fn messages(
        &self,
        conversation_id: ConversationId,
        viewer: UserId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, GatewayError> {
        let record = self.store.load(conversation_id).await?;
        if !record.conversation.is_participant(viewer) {
            return Err(not_participant(viewer, conversation_id));
        }
        self.store
            .list_messages(conversation_id, before, limit.clamp(1, MAX_PAGE))
            .await
    }

    async fn run(
        &self,
        mut record: ConversationRecord,
        actor: Actor,
        command: Command,
        mut settlement: Option<OrderSettlement>,
    ) -> Result<Committed, GatewayError> {
        let conversation_id = record.conversation.id;
        let mut messages = Vec::new();
        let mut ledger_entries = Vec::new();
        let mut next = Some((actor, command));
        let mut primary = true;
        let mut retries = 0;

        while let Some((actor, command)) = next.take() {
            let kind = command.kind();
            let result = self
                .commit_one(&record.conversation, actor, &command, settlement.take())
                .await;
            let (outcome, follow_up) = match result {
                Ok(done) => done,
                Err(e) => {
                    log_rejection(&e, conversation_id, kind, actor);
                    if primary {
                        return Err(e);
                    }
                    if retries < FOLLOW_UP_RETRIES && is_retryable(&e) {
                        retries += 1;
                        if let Ok(fresh) = self.store.load(conversation_id).await {
                            record = fresh;
                        }
                        next = Some((actor, command));
                        continue;
                    }
                    tracing::warn!(
                        %conversation_id,
                        command = %kind,
                        flow_state = %record.conversation.flow_state,
                        error = %e,
                        "follow-up abandoned; the sweeper resumes it"
                    );
                    break;
                }
            };
            retries = 0;
            let before = record.conversation.flow_state;
            record.conversation = outcome.conversation;
            tracing::info!(
                %conversation_id,
                %actor,
                command = %kind,
                from = %before,
                flow_state = %record.conversation.flow_state,
                version = record.conversation.version,
                "transition committed"
            );
            self.notify_transition(before, &record.conversation);
            messages.extend(outcome.messages);
            ledger_entries.extend(outcome.ledger_entries);
            primary = false;
            next = follow_up.map(|c| (Actor::System, c));
        }

        Ok(Committed {
            record,
            messages,
            ledger_entries,
        })
    }

    async fn commit_one(
        &self,
        conversation: &Conversation,
        actor: Actor,
        command: &Command,
        settlement: Option<OrderSettlement>,
    ) -> Result<(CommitOutcome, Option<Command>), GatewayError> {
        let policy = FlowPolicy {
            commission: self.settings.commission_rate().await?,
            ..self.policy
        };
        let plan = engine::plan(conversation, actor, command, &policy)?;
        let follow_up = plan.follow_up.clone();
        let commit = TransitionCommit {
            conversation_id: conversation.id,
            plan,
            settlement,
        };

        let store = Arc::clone(&self.store);
        let outbox = self.outbox.clone();
        let outcome = tokio::spawn(async move {
            let outcome = store.apply_transition(commit).await?;
            outbox.enqueue(CommitNotice {
                conversation: outcome.conversation.clone(),
                messages: outcome.messages.clone(),
            });
            Ok::<_, GatewayError>(outcome)
        })
        .await
        .map_err(|e| GatewayError::Internal(format!("commit task failed: {e}")))??;
        Ok((outcome, follow_up))
    }

    fn notify_transition(&self, from: FlowState, conversation: &Conversation) {
        let to = conversation.flow_state;
        if from == to {
            return;
        }
        let conversation_id = conversation.id;
        let brand = conversation.brand_owner_id;
        let influencer = conversation.influencer_id;
        match to {
            FlowState::InfluencerPriceResponse | FlowState::InfluencerFinalResponse => {
                if let Some(amount) = conversation.pending_offer {
                    self.notify(
                        influencer,
                        Notification::OfferReceived {
                            conversation_id,
                            amount,
                        },
                    );
                }
            }
            FlowState::BrandOwnerNegotiation => {
                if let Some(amount) = conversation.pending_offer {
                    self.notify(
                        brand,
                        Notification::OfferReceived {
                            conversation_id,
                            amount,
                        },
                    );
                }
            }
            FlowState::PaymentPending => {
                if let Some(amount) = conversation.final_agreed_amount {
                    self.notify(
                        brand,
                        Notification::PaymentDue {
                            conversation_id,
                            amount,
                        },
                    );
                }
            }
            FlowState::PaymentCompleted => {
                self.notify(influencer, Notification::PaymentReceived { conversation_id });
            }
            FlowState::WorkSubmitted => {
                self.notify(brand, Notification::WorkSubmitted { conversation_id });
            }
            FlowState::WorkApproved => {
                self.notify(influencer, Notification::WorkApproved { conversation_id });
            }
            FlowState::Closed => {
                for user in conversation.participants() {
                    self.notify(user, Notification::Closed { conversation_id });
                }
            }
            _ => {}
        }
    }

    fn notify(&self, to: UserId, notification: Notification) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.send(to, notification).await {
                tracing::warn!(user_id = %to, error = %e, "notification failed");
            }
        });
    }
}

const FOLLOW_UP_RETRIES: u32 = 3;

fn is_retryable(e: &GatewayError) -> bool {
    match e {
        GatewayError::Conflict { .. } => true,
        GatewayError::InvariantViolation(_) => false,
        other => other.status_code().is_server_error(),
    }
}

fn not_participant(user: UserId, conversation_id: ConversationId) -> GatewayError {
    GatewayError::Forbidden(format!(
        "user {user} is not part of conversation {conversation_id}"
    ))
}

fn log_rejection(e: &GatewayError, conversation_id: ConversationId, command: CommandKind, actor: Actor) {
    match e {
        GatewayError::InvariantViolation(_) => {
            tracing::error!(%conversation_id, %command, %actor, error = %e, "invariant violation");
        }
        GatewayError::Conflict { current } => {
            tracing::debug!(%conversation_id, %command, %actor, flow_state = %current, "conflict");
        }
        e if e.status_code().is_server_error() => {
            tracing::warn!(%conversation_id, %command, %actor, error = %e, "command failed");
        }
        _ => {
            tracing::debug!(%conversation_id, %command, %actor, error = %e, "command rejected");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::ledger::EntryKind;
    use crate::domain::money::{CommissionRate, Minor};
    use crate::domain::payment::{OrderPurpose, OrderStatus, PaymentOrder};
    use crate::external::MemoryNotifier;
    use crate::service::fanout::FanoutDispatcher;
    use crate::store::MemoryStore;

    struct Harness {
        service: ChatService,
        store: Arc<MemoryStore>,
        notifier: Arc<MemoryNotifier>,
        bus: EventBus,
        brand: UserId,
        influencer: UserId,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let dyn_store = Arc::clone(&store) as Arc<dyn ChatStore>;
        let bus = EventBus::new(1024);
        let (outbox, _handle) = FanoutDispatcher::spawn(Arc::clone(&dyn_store), bus.clone());
        let notifier = Arc::new(MemoryNotifier::new());
        let settings = SettingsHolder::new(Arc::clone(&dyn_store), CommissionRate::DEFAULT);
        let service = ChatService::new(
            dyn_store,
            outbox,
            bus.clone(),
            settings,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            FlowPolicy::default(),
        );
        let Ok(brand) = service
            .register_user(User::new(Role::BrandOwner, "Acme"))
            .await
        else {
            panic!("brand registers");
        };
        let Ok(influencer) = service
            .register_user(User::new(Role::Influencer, "Ivy"))
            .await
        else {
            panic!("influencer registers");
        };
        Harness {
            service,
            store,
            notifier,
            bus,
            brand: brand.id,
            influencer: influencer.id,
        }
    }

    async fn connected(h: &Harness) -> ConversationId {
        let Ok(request) = h
            .service
            .apply(h.influencer, h.brand, Binding::Campaign(uuid::Uuid::new_v4()))
            .await
        else {
            panic!("influencer applies");
        };
        let Ok(opened) = h.service.connect(request.id, h.brand).await else {
            panic!("brand connects");
        };
        opened.record.conversation.id
    }

    async fn agreed(h: &Harness, amount: Minor) -> ConversationId {
        let id = connected(h).await;
        let offer = h
            .service
            .execute(id, Actor::Participant(h.brand), Command::SendPriceOffer { amount })
            .await;
        assert!(offer.is_ok());
        let accept = h
            .service
            .execute(id, Actor::Participant(h.influencer), Command::AcceptPrice)
            .await;
        assert!(accept.is_ok());
        id
    }

    async fn escrow_settlement(h: &Harness, id: ConversationId, amount: Minor) -> OrderSettlement {
        let order = PaymentOrder::new(
            format!("order_{id}"),
            h.brand,
            OrderPurpose::Escrow {
                conversation_id: id,
            },
            amount,
            "INR".to_string(),
        );
        let Ok(()) = h.store.insert_order(&order).await else {
            panic!("order inserted");
        };
        OrderSettlement {
            order_id: order.id,
            status: OrderStatus::Paid,
            gateway_payment_id: "pay_1".to_string(),
        }
    }

    #[tokio::test]
    async fn register_rejects_reserved_ids() {
        let h = harness().await;
        let mut user = User::new(Role::Admin, "root");
        user.id = UserId::SYSTEM;
        assert!(matches!(
            h.service.register_user(user).await,
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn apply_requires_an_influencer() {
        let h = harness().await;
        let result = h
            .service
            .apply(h.brand, h.influencer, Binding::Bid(uuid::Uuid::new_v4()))
            .await;
        assert!(matches!(result, Err(GatewayError::Forbidden(_))));
    }

    #[tokio::test]
    async fn connect_is_idempotent_and_owner_only() {
        let h = harness().await;
        let Ok(request) = h
            .service
            .apply(h.influencer, h.brand, Binding::Campaign(uuid::Uuid::new_v4()))
            .await
        else {
            panic!("applied");
        };
        assert!(matches!(
            h.service.connect(request.id, h.influencer).await,
            Err(GatewayError::Forbidden(_))
        ));

        let Ok(first) = h.service.connect(request.id, h.brand).await else {
            panic!("first connect");
        };
        let Ok(second) = h.service.connect(request.id, h.brand).await else {
            panic!("second connect");
        };
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.record.conversation.id, second.record.conversation.id);
        assert_eq!(first.record.conversation.flow_state, FlowState::InitialOffer);
        assert_eq!(first.messages.len(), 1);
    }

    #[tokio::test]
    async fn offer_and_accept_reach_payment_pending() {
        let h = harness().await;
        let id = agreed(&h, 300_000).await;
        let Ok(record) = h.store.load(id).await else {
            panic!("conversation exists");
        };
        assert_eq!(record.conversation.flow_state, FlowState::PaymentPending);
        assert_eq!(record.conversation.final_agreed_amount, Some(300_000));
    }

    #[tokio::test]
    async fn wrong_role_writes_nothing() {
        let h = harness().await;
        let id = connected(&h).await;
        let Ok(before) = h.store.load(id).await else {
            panic!("conversation exists");
        };
        let result = h
            .service
            .execute(
                id,
                Actor::Participant(h.influencer),
                Command::SendPriceOffer { amount: 1000 },
            )
            .await;
        assert!(matches!(result, Err(GatewayError::RoleMismatch(_))));
        let Ok(after) = h.store.load(id).await else {
            panic!("conversation exists");
        };
        assert_eq!(before.conversation.version, after.conversation.version);
    }

    #[tokio::test]
    async fn text_outside_real_time_is_illegal() {
        let h = harness().await;
        let id = connected(&h).await;
        let result = h
            .service
            .send_message(id, h.brand, MessageInput::Text("hello".to_string()))
            .await;
        assert!(matches!(result, Err(GatewayError::IllegalTransition(_))));
    }

    #[tokio::test]
    async fn approve_releases_escrow_and_opens_chat() {
        let h = harness().await;
        let id = agreed(&h, 300_000).await;
        let settlement = escrow_settlement(&h, id, 300_000).await;
        let Ok(paid) = h.service.confirm_payment(id, settlement).await else {
            panic!("payment confirmed");
        };
        assert_eq!(paid.record.conversation.flow_state, FlowState::PaymentCompleted);
        assert!(paid.record.conversation.escrow_hold_id.is_some());

        let submit = h
            .service
            .execute(
                id,
                Actor::Participant(h.influencer),
                Command::SubmitWork {
                    attachments: vec!["https://cdn.example/reel.mp4".to_string()],
                },
            )
            .await;
        assert!(submit.is_ok());

        let Ok(approved) = h
            .service
            .execute(id, Actor::Participant(h.brand), Command::ApproveWork)
            .await
        else {
            panic!("work approved");
        };
        assert_eq!(approved.record.conversation.flow_state, FlowState::RealTime);
        assert_eq!(approved.messages.len(), 2);
        assert!(approved
            .ledger_entries
            .iter()
            .any(|e| e.kind == EntryKind::Fee && e.amount_minor == 30_000));

        let Ok(wallet) = h.store.wallet(h.influencer).await else {
            panic!("wallet");
        };
        assert_eq!(wallet.available, 270_000);
        let (total, deposits) = h.store.money_totals().await;
        assert_eq!(total, deposits);
    }

    #[test]
    fn follow_ups_retry_only_recoverable_failures() {
        assert!(is_retryable(&GatewayError::Conflict {
            current: FlowState::WorkApproved
        }));
        assert!(is_retryable(&GatewayError::PersistenceError("pool timed out".into())));
        assert!(is_retryable(&GatewayError::ExternalUnavailable("timeout".into())));
        assert!(!is_retryable(&GatewayError::InvariantViolation("no hold".into())));
        assert!(!is_retryable(&GatewayError::IllegalTransition("closed".into())));
    }

    #[tokio::test]
    async fn confirmed_payment_funds_a_zero_balance_brand() {
        let h = harness().await;
        let id = agreed(&h, 300_000).await;
        let settlement = escrow_settlement(&h, id, 300_000).await;
        let Ok(paid) = h.service.confirm_payment(id, settlement).await else {
            panic!("a captured payment always funds the escrow");
        };
        assert_eq!(paid.record.conversation.flow_state, FlowState::PaymentCompleted);
        assert!(paid.ledger_entries.iter().any(|e| e.kind == EntryKind::Deposit
            && e.refs.gateway_payment_id.as_deref() == Some("pay_1")));

        let Ok(Some(order)) = h.store.find_order(&format!("order_{id}")).await else {
            panic!("order exists");
        };
        assert_eq!(order.status, OrderStatus::Paid);
        let Ok(wallet) = h.store.wallet(h.brand).await else {
            panic!("wallet");
        };
        assert_eq!((wallet.available, wallet.frozen), (0, 300_000));
        assert_eq!(h.store.money_totals().await, (300_000, 300_000));
    }

    #[tokio::test]
    async fn button_click_resolves_server_side() {
        let h = harness().await;
        let id = connected(&h).await;
        let payload = serde_json::json!({"amount": 500000, "action": "accept_price"});
        let Ok(ButtonOutcome::Committed(done)) = h
            .service
            .button_click(id, h.brand, "send_price_offer", Some(&payload))
            .await
        else {
            panic!("offer button runs");
        };
        assert_eq!(
            done.record.conversation.flow_state,
            FlowState::InfluencerPriceResponse
        );
        assert_eq!(done.record.conversation.pending_offer, Some(500_000));

        let stranger = UserId::new();
        assert!(matches!(
            h.service.button_click(id, stranger, "accept_price", None).await,
            Err(GatewayError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn initiate_payment_button_asks_for_checkout() {
        let h = harness().await;
        let id = agreed(&h, 300_000).await;
        let outcome = h
            .service
            .button_click(id, h.brand, "initiate_payment", None)
            .await;
        assert!(matches!(outcome, Ok(ButtonOutcome::Checkout)));
    }

    #[tokio::test]
    async fn expire_conflicts_after_activity() {
        let h = harness().await;
        let id = connected(&h).await;
        let Ok(stale) = h.store.load(id).await else {
            panic!("conversation exists");
        };
        let offer = h
            .service
            .execute(
                id,
                Actor::Participant(h.brand),
                Command::SendPriceOffer { amount: 100_000 },
            )
            .await;
        assert!(offer.is_ok());
        assert!(matches!(
            h.service.expire(stale.conversation).await,
            Err(GatewayError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn mark_seen_resets_the_reader() {
        let h = harness().await;
        let id = connected(&h).await;
        let mut rx = h.bus.subscribe();
        let offer = h
            .service
            .execute(
                id,
                Actor::Participant(h.brand),
                Command::SendPriceOffer { amount: 100_000 },
            )
            .await;
        assert!(offer.is_ok());

        let Ok(seen) = h.service.mark_seen(id, h.influencer).await else {
            panic!("mark seen");
        };
        assert!(!seen.is_empty());
        let Ok(unread) = h.store.unread_count(id, h.influencer).await else {
            panic!("unread");
        };
        assert_eq!(unread, 0);

        let reset = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.room == h.influencer
                            && matches!(
                                event.event,
                                ChatEvent::UnreadCountUpdated {
                                    action: UnreadAction::Reset,
                                    ..
                                }
                            )
                        {
                            return true;
                        }
                    }
                    Err(_) => return false,
                }
            }
        })
        .await;
        assert_eq!(reset.ok(), Some(true));
    }

    #[tokio::test]
    async fn state_changes_notify_the_awaited_side() {
        let h = harness().await;
        let _ = agreed(&h, 300_000).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = h.notifier.sent();
        assert!(sent.iter().any(|(to, n)| *to == h.influencer
            && matches!(n, Notification::OfferReceived { amount: 300_000, .. })));
        assert!(sent.iter().any(|(to, n)| *to == h.brand
            && matches!(n, Notification::PaymentDue { amount: 300_000, .. })));
    }

    #[tokio::test]
    async fn direct_chat_starts_in_real_time() {
        let h = harness().await;
        let Ok(opened) = h.service.open_direct(h.influencer, h.brand).await else {
            panic!("direct chat");
        };
        let conversation = &opened.record.conversation;
        assert_eq!(conversation.flow_state, FlowState::RealTime);
        assert_eq!(conversation.influencer_id, h.influencer);
        assert_eq!(conversation.brand_owner_id, h.brand);

        let Ok(sent) = h
            .service
            .send_message(conversation.id, h.brand, MessageInput::Text(" hi ".to_string()))
            .await
        else {
            panic!("text in real time");
        };
        assert_eq!(sent.messages.len(), 1);
        let Ok(history) = h
            .service
            .messages(conversation.id, h.influencer, None, 50)
            .await
        else {
            panic!("history");
        };
        assert_eq!(history.len(), 1);
    }
}
