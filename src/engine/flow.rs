//! Pure transition planner.
//!
//! [`plan`] takes the current conversation, the actor and a command, runs
//! the guards in order and returns a [`TransitionPlan`]: the state patch,
//! the messages to append, the ledger effect and any follow-up command.
//! It performs no I/O; the store commits the plan as one unit.

use chrono::{DateTime, Utc};

use super::table;
use crate::domain::action::{self, Action};
use crate::domain::command::{Actor, Command, CommandKind};
use crate::domain::conversation::{AwaitingRole, ChatStatus, Conversation, FlowState};
use crate::domain::ledger::{LedgerEffect, LedgerRefs};
use crate::domain::message::{MessageBody, MessageType, NewMessage};
use crate::domain::money::{AmountLimits, CommissionRate, Minor, format_minor};
use crate::domain::user::Role;
use crate::domain::{LedgerEntryId, UserId};
use crate::error::GatewayError;

/// Tunables the planner needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowPolicy {
    /// Bounds for every user-supplied amount.
    pub limits: AmountLimits,
    /// Counter-offer cap.
    pub max_rounds: u32,
    /// Commission applied when a release is planned.
    pub commission: CommissionRate,
}

impl Default for FlowPolicy {
    fn default() -> Self {
        Self {
            limits: AmountLimits::default(),
            max_rounds: 3,
            commission: CommissionRate::DEFAULT,
        }
    }
}

/// Conversation columns a transition writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatePatch {
    /// New state.
    pub flow_state: FlowState,
    /// Derived from `flow_state`.
    pub awaiting_role: AwaitingRole,
    /// Derived from `flow_state`.
    pub chat_status: ChatStatus,
    /// Agreed price.
    pub final_agreed_amount: Option<Minor>,
    /// Amount on the table.
    pub pending_offer: Option<Minor>,
    /// Rounds used.
    pub negotiation_round: u32,
    /// Hold backing the conversation.
    pub escrow_hold_id: Option<LedgerEntryId>,
}

impl StatePatch {
    fn from_conversation(conv: &Conversation, to: FlowState) -> Self {
        Self {
            flow_state: to,
            awaiting_role: to.awaiting_role(),
            chat_status: to.chat_status(),
            final_agreed_amount: conv.final_agreed_amount,
            pending_offer: conv.pending_offer,
            negotiation_round: conv.negotiation_round,
            escrow_hold_id: conv.escrow_hold_id,
        }
    }

    /// Returns `conv` with the patch applied and its version bumped.
    #[must_use]
    pub fn apply(&self, conv: &Conversation, now: DateTime<Utc>) -> Conversation {
        Conversation {
            flow_state: self.flow_state,
            awaiting_role: self.awaiting_role,
            chat_status: self.chat_status,
            final_agreed_amount: self.final_agreed_amount,
            pending_offer: self.pending_offer,
            negotiation_round: self.negotiation_round,
            escrow_hold_id: self.escrow_hold_id,
            version: conv.version + 1,
            last_activity_at: now,
            updated_at: now,
            ..conv.clone()
        }
    }
}

/// Everything one accepted command writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    /// State the plan was computed against.
    pub from: FlowState,
    /// Version the plan was computed against.
    pub expected_version: u64,
    /// Command kind, for logs.
    pub command: CommandKind,
    /// Columns to write.
    pub patch: StatePatch,
    /// Messages to append, in order.
    pub messages: Vec<NewMessage>,
    /// Money movement.
    pub ledger: LedgerEffect,
    /// Command the service issues as the system right after commit.
    pub follow_up: Option<Command>,
}

impl TransitionPlan {
    /// Target state.
    #[must_use]
    pub const fn to(&self) -> FlowState {
        self.patch.flow_state
    }
}

/// Plans `command` by `actor` against `conv`.
///
/// Guards run in order: participation, turn, table, amount.
///
/// # Errors
///
/// - [`GatewayError::Forbidden`] when the actor is not a participant.
/// - [`GatewayError::IllegalTransition`] for system-only commands from a
///   participant, or commands the table does not allow now.
/// - [`GatewayError::RoleMismatch`] when it is the other side's turn.
/// - [`GatewayError::InvalidAmount`] for out-of-bounds prices.
/// - [`GatewayError::InvalidRequest`] for empty text or deliverables.
/// - [`GatewayError::InvariantViolation`] when stored data contradicts the
///   state (an agreed amount or hold is missing).
pub fn plan(
    conv: &Conversation,
    actor: Actor,
    command: &Command,
    policy: &FlowPolicy,
) -> Result<TransitionPlan, GatewayError> {
    let kind = command.kind();
    check_turn(conv, actor, kind)?;

    let Some(mut to) = table::targets(conv.flow_state, kind).next() else {
        return Err(GatewayError::IllegalTransition(format!(
            "{kind} is not allowed in {}",
            conv.flow_state
        )));
    };

    let at_cap = conv.negotiation_round >= policy.max_rounds;
    if kind == CommandKind::NegotiatePrice && at_cap {
        return Err(GatewayError::IllegalTransition(format!(
            "negotiation is limited to {} rounds",
            policy.max_rounds
        )));
    }

    if let Some(amount) = command.amount() {
        policy.limits.check(amount)?;
    }

    let mut patch = StatePatch::from_conversation(conv, to);
    let mut ledger = LedgerEffect::None;
    let mut follow_up = None;
    let mut note = None;
    let mut attachments = Vec::new();

    match command {
        Command::SendPriceOffer { amount } | Command::SendNegotiatedPrice { amount } => {
            patch.pending_offer = Some(*amount);
        }
        Command::NegotiatePrice { amount } => {
            patch.negotiation_round = conv.negotiation_round + 1;
            patch.pending_offer = Some(*amount);
        }
        Command::ContinueNegotiate { amount } => {
            if at_cap {
                to = FlowState::InfluencerFinalResponse;
                patch = StatePatch::from_conversation(conv, to);
            } else {
                to = FlowState::BrandOwnerPricing;
                patch = StatePatch::from_conversation(conv, to);
                patch.negotiation_round = conv.negotiation_round + 1;
                patch.pending_offer = Some(*amount);
            }
        }
        Command::AcceptPrice | Command::AcceptNegotiatedPrice => {
            if conv.final_agreed_amount.is_some() {
                return Err(GatewayError::InvariantViolation(format!(
                    "conversation {} already has an agreed amount",
                    conv.id
                )));
            }
            let offer = conv.pending_offer.ok_or_else(|| {
                GatewayError::InvariantViolation(format!(
                    "conversation {} has no offer on the table",
                    conv.id
                ))
            })?;
            patch.final_agreed_amount = Some(offer);
        }
        Command::PaymentConfirmed { gateway_payment_id } => {
            let amount = conv.final_agreed_amount.ok_or_else(|| {
                GatewayError::InvariantViolation(format!(
                    "conversation {} has no agreed amount to escrow",
                    conv.id
                ))
            })?;
            let hold_id = LedgerEntryId::new();
            let mut refs = LedgerRefs::conversation(conv.id, conv.request_id);
            refs.gateway_payment_id = Some(gateway_payment_id.clone());
            ledger = LedgerEffect::FundAndFreeze {
                hold_id,
                payer: conv.brand_owner_id,
                amount,
                refs,
            };
            patch.escrow_hold_id = Some(hold_id);
        }
        Command::ApproveWork => {
            let hold_id = conv.escrow_hold_id.ok_or_else(|| {
                GatewayError::InvariantViolation(format!(
                    "conversation {} has no escrow hold to release",
                    conv.id
                ))
            })?;
            ledger = LedgerEffect::Release {
                hold_id,
                payee: conv.influencer_id,
                rate: policy.commission,
            };
            follow_up = Some(Command::OpenChat);
        }
        Command::Timeout => {
            if let Some(hold_id) = conv.escrow_hold_id {
                ledger = LedgerEffect::Refund { hold_id };
            }
        }
        Command::SubmitWork { attachments: urls } => {
            if urls.iter().all(|u| u.trim().is_empty()) {
                return Err(GatewayError::InvalidRequest(
                    "submit_work needs at least one attachment".to_string(),
                ));
            }
            attachments = urls.clone();
        }
        Command::RequestRevision { note: text } => {
            if !text.trim().is_empty() {
                note = Some(text.clone());
            }
        }
        Command::SendText { body } => {
            if body.trim().is_empty() {
                return Err(GatewayError::InvalidRequest("message text is empty".to_string()));
            }
        }
        Command::RejectPrice
        | Command::AgreeNegotiation
        | Command::RejectNegotiation
        | Command::RejectNegotiatedPrice
        | Command::StartWork
        | Command::OpenChat
        | Command::CloseChat => {}
    }

    if !table::is_edge(conv.flow_state, kind, to) {
        return Err(GatewayError::InvariantViolation(format!(
            "planned {} --{kind}--> {to} is not in the transition table",
            conv.flow_state
        )));
    }

    let message = match command {
        Command::SendText { body } => {
            let sender = actor.user_id().ok_or_else(|| {
                GatewayError::IllegalTransition("the system cannot send chat text".to_string())
            })?;
            NewMessage::new(
                sender,
                counterpart_or_brand(conv, actor),
                MessageBody::text(body.trim()),
                MessageType::UserInput,
            )
        }
        _ => {
            let after = patch.apply(conv, conv.updated_at);
            match action::render(&after, policy.max_rounds) {
                Some(mut action) => {
                    action.params.note = note;
                    action.params.attachments = attachments;
                    automated_message(&after, action)
                }
                None => NewMessage::new(
                    UserId::SYSTEM,
                    counterpart_or_brand(conv, actor),
                    MessageBody::text(outcome_text(conv, actor, command, &patch, policy)),
                    MessageType::System,
                ),
            }
        }
    };

    Ok(TransitionPlan {
        from: conv.flow_state,
        expected_version: conv.version,
        command: kind,
        patch,
        messages: vec![message],
        ledger,
        follow_up,
    })
}

/// The message a freshly opened conversation starts with: the brand's
/// first price input, or nothing for direct chats.
#[must_use]
pub fn opening_message(conv: &Conversation, max_rounds: u32) -> Option<NewMessage> {
    action::render(conv, max_rounds).map(|action| automated_message(conv, action))
}

fn check_turn(conv: &Conversation, actor: Actor, kind: CommandKind) -> Result<(), GatewayError> {
    let Actor::Participant(user) = actor else {
        if kind.is_system_only() {
            return Ok(());
        }
        return Err(GatewayError::IllegalTransition(format!(
            "{kind} must be issued by a participant"
        )));
    };
    let role = conv.role_of(user).ok_or_else(|| {
        GatewayError::Forbidden(format!("user {user} is not part of conversation {}", conv.id))
    })?;
    if kind.is_system_only() {
        return Err(GatewayError::IllegalTransition(format!(
            "{kind} can only be issued by the platform"
        )));
    }
    let free_chat = conv.flow_state == FlowState::RealTime
        && matches!(kind, CommandKind::SendText | CommandKind::CloseChat);
    if free_chat {
        return Ok(());
    }
    match conv.awaiting_role.role() {
        Some(awaited) if awaited != role => Err(GatewayError::RoleMismatch(format!(
            "conversation is waiting for the {awaited}"
        ))),
        _ => Ok(()),
    }
}

/// Automated messages go to the awaited participant from the other one.
fn automated_message(conv: &Conversation, action: Action) -> NewMessage {
    let receiver = match conv.awaiting_role {
        AwaitingRole::Influencer => conv.influencer_id,
        AwaitingRole::BrandOwner | AwaitingRole::None => conv.brand_owner_id,
    };
    let sender = conv.counterpart(receiver).unwrap_or(UserId::SYSTEM);
    NewMessage::new(sender, receiver, MessageBody::Action(action), MessageType::Automated)
}

fn counterpart_or_brand(conv: &Conversation, actor: Actor) -> UserId {
    actor
        .user_id()
        .and_then(|user| conv.counterpart(user))
        .unwrap_or(conv.brand_owner_id)
}

fn outcome_text(
    conv: &Conversation,
    actor: Actor,
    command: &Command,
    patch: &StatePatch,
    policy: &FlowPolicy,
) -> String {
    let who = match actor.user_id().and_then(|u| conv.role_of(u)) {
        Some(Role::BrandOwner) => "The brand",
        Some(Role::Influencer) => "The influencer",
        Some(Role::Admin) | None => "The platform",
    };
    match command {
        Command::RejectPrice | Command::RejectNegotiatedPrice => {
            format!("{who} rejected the offer. The negotiation is closed.")
        }
        Command::RejectNegotiation => {
            format!("{who} declined to negotiate. The negotiation is closed.")
        }
        Command::ApproveWork => {
            let amount = patch.final_agreed_amount.unwrap_or_default();
            let (payout, _) = policy.commission.split(amount);
            format!(
                "Work approved. {} has been released to the influencer.",
                format_minor(payout)
            )
        }
        Command::OpenChat => "The chat is now open.".to_string(),
        Command::CloseChat => format!("{who} closed the chat."),
        Command::Timeout if conv.escrow_hold_id.is_some() => {
            "The conversation timed out. The escrowed payment was refunded.".to_string()
        }
        Command::Timeout => "The conversation timed out due to inactivity.".to_string(),
        _ => format!("Conversation moved to {}.", patch.flow_state),
    }
}
