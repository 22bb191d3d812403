//! Conversation aggregate: participants, binding context and flow state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::money::Minor;
use super::user::{Role, User};
use super::{ConversationId, LedgerEntryId, RequestId, UserId};
use crate::error::GatewayError;

/// Discrete state of the negotiated-chat state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// Brand must send the first price.
    InitialOffer,
    /// Influencer accepts, rejects or counters the brand's offer.
    InfluencerPriceResponse,
    /// Brand decides whether to engage with the influencer's counter.
    BrandOwnerNegotiation,
    /// Brand types a new price.
    NegotiationInput,
    /// Influencer responds to the brand's negotiated price.
    InfluencerFinalResponse,
    /// Brand sends a fresh offer after a continued negotiation.
    BrandOwnerPricing,
    /// Price agreed; waiting for the gateway to confirm the brand's payment.
    PaymentPending,
    /// Funds frozen; influencer must start or submit work.
    PaymentCompleted,
    /// Influencer is working (or reworking after a revision request).
    WorkInProgress,
    /// Brand must approve the work or request a revision.
    WorkSubmitted,
    /// Funds released to the influencer.
    WorkApproved,
    /// Unstructured chat.
    RealTime,
    /// Terminal.
    Closed,
}

impl FlowState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 13] = [
        Self::InitialOffer,
        Self::InfluencerPriceResponse,
        Self::BrandOwnerNegotiation,
        Self::NegotiationInput,
        Self::InfluencerFinalResponse,
        Self::BrandOwnerPricing,
        Self::PaymentPending,
        Self::PaymentCompleted,
        Self::WorkInProgress,
        Self::WorkSubmitted,
        Self::WorkApproved,
        Self::RealTime,
        Self::Closed,
    ];

    /// Returns the wire name of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InitialOffer => "initial_offer",
            Self::InfluencerPriceResponse => "influencer_price_response",
            Self::BrandOwnerNegotiation => "brand_owner_negotiation",
            Self::NegotiationInput => "negotiation_input",
            Self::InfluencerFinalResponse => "influencer_final_response",
            Self::BrandOwnerPricing => "brand_owner_pricing",
            Self::PaymentPending => "payment_pending",
            Self::PaymentCompleted => "payment_completed",
            Self::WorkInProgress => "work_in_progress",
            Self::WorkSubmitted => "work_submitted",
            Self::WorkApproved => "work_approved",
            Self::RealTime => "real_time",
            Self::Closed => "closed",
        }
    }

    /// Participant whose input the conversation is blocked on.
    #[must_use]
    pub const fn awaiting_role(&self) -> AwaitingRole {
        match self {
            Self::InitialOffer
            | Self::BrandOwnerNegotiation
            | Self::NegotiationInput
            | Self::BrandOwnerPricing
            | Self::PaymentPending
            | Self::WorkSubmitted => AwaitingRole::BrandOwner,
            Self::InfluencerPriceResponse
            | Self::InfluencerFinalResponse
            | Self::PaymentCompleted
            | Self::WorkInProgress => AwaitingRole::Influencer,
            Self::WorkApproved | Self::RealTime | Self::Closed => AwaitingRole::None,
        }
    }

    /// Chat status implied by the state.
    #[must_use]
    pub const fn chat_status(&self) -> ChatStatus {
        match self {
            Self::WorkApproved | Self::RealTime => ChatStatus::Realtime,
            Self::Closed => ChatStatus::Closed,
            _ => ChatStatus::Negotiation,
        }
    }

    /// Price negotiation states (before payment).
    #[must_use]
    pub const fn is_negotiating(&self) -> bool {
        matches!(
            self,
            Self::InitialOffer
                | Self::InfluencerPriceResponse
                | Self::BrandOwnerNegotiation
                | Self::NegotiationInput
                | Self::InfluencerFinalResponse
                | Self::BrandOwnerPricing
        )
    }

    /// Intermediate states the system leaves on its own, right after the
    /// commit that entered them. A conversation found resting here was
    /// interrupted between the two commits.
    #[must_use]
    pub const fn awaits_system(&self) -> bool {
        matches!(self, Self::WorkApproved)
    }

    /// States closed by the idle sweeper once the negotiation timeout
    /// elapses. `work_submitted` is excluded: the influencer has delivered.
    #[must_use]
    pub const fn is_timeout_eligible(&self) -> bool {
        self.is_negotiating()
            || matches!(
                self,
                Self::PaymentPending | Self::PaymentCompleted | Self::WorkInProgress
            )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowState {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| GatewayError::Internal(format!("unknown flow state: {s}")))
    }
}

/// Which participant the conversation is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AwaitingRole {
    /// The brand owner must act.
    BrandOwner,
    /// The influencer must act.
    Influencer,
    /// Nobody is awaited (real-time chat or closed).
    None,
}

impl AwaitingRole {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BrandOwner => "brand_owner",
            Self::Influencer => "influencer",
            Self::None => "none",
        }
    }

    /// Returns the awaited [`Role`], if any.
    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        match self {
            Self::BrandOwner => Some(Role::BrandOwner),
            Self::Influencer => Some(Role::Influencer),
            Self::None => None,
        }
    }
}

/// Coarse conversation status shown in list views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    /// Structured negotiation, payment and work review.
    Negotiation,
    /// Free-form chat.
    Realtime,
    /// Terminal.
    Closed,
}

impl ChatStatus {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Negotiation => "negotiation",
            Self::Realtime => "realtime",
            Self::Closed => "closed",
        }
    }
}

/// Business context a conversation is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Binding {
    /// Direct chat with no campaign or bid.
    Direct,
    /// Bound to a campaign.
    Campaign(uuid::Uuid),
    /// Bound to a bid.
    Bid(uuid::Uuid),
}

impl Binding {
    /// Returns `(campaign_id, bid_id)` columns.
    #[must_use]
    pub const fn columns(&self) -> (Option<uuid::Uuid>, Option<uuid::Uuid>) {
        match self {
            Self::Direct => (None, None),
            Self::Campaign(id) => (Some(*id), None),
            Self::Bid(id) => (None, Some(*id)),
        }
    }

    /// Rebuilds a binding from its columns.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] if both ids are set.
    pub fn from_columns(
        campaign_id: Option<uuid::Uuid>,
        bid_id: Option<uuid::Uuid>,
    ) -> Result<Self, GatewayError> {
        match (campaign_id, bid_id) {
            (None, None) => Ok(Self::Direct),
            (Some(id), None) => Ok(Self::Campaign(id)),
            (None, Some(id)) => Ok(Self::Bid(id)),
            (Some(_), Some(_)) => Err(GatewayError::InvalidRequest(
                "binding must reference a campaign or a bid, not both".to_string(),
            )),
        }
    }
}

/// The unit the state machine operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id.
    pub id: ConversationId,
    /// Brand-side participant.
    pub brand_owner_id: UserId,
    /// Influencer-side participant.
    pub influencer_id: UserId,
    /// Campaign/bid context.
    pub binding: Binding,
    /// Request this conversation was opened from, if any.
    pub request_id: Option<RequestId>,
    /// Coarse status, always derived from `flow_state`.
    pub chat_status: ChatStatus,
    /// State machine position.
    pub flow_state: FlowState,
    /// Awaited participant, always derived from `flow_state`.
    pub awaiting_role: AwaitingRole,
    /// Agreed price; written once on entry to `payment_pending`.
    pub final_agreed_amount: Option<Minor>,
    /// Amount currently on the table (last offer or counter).
    pub pending_offer: Option<Minor>,
    /// Counter-offer rounds used so far.
    pub negotiation_round: u32,
    /// `escrow_hold` entry backing this conversation, once paid.
    pub escrow_hold_id: Option<LedgerEntryId>,
    /// Gateway order created at checkout.
    pub gateway_order_id: Option<String>,
    /// Optimistic-concurrency version, bumped on every write.
    pub version: u64,
    /// Last participant or system action, used by the idle sweeper.
    pub last_activity_at: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Creates a conversation in the given starting state.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] if both participants are the
    /// same user.
    pub fn new(
        brand_owner_id: UserId,
        influencer_id: UserId,
        binding: Binding,
        request_id: Option<RequestId>,
        start: FlowState,
    ) -> Result<Self, GatewayError> {
        if brand_owner_id == influencer_id {
            return Err(GatewayError::InvalidRequest(
                "a conversation needs two distinct participants".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: ConversationId::new(),
            brand_owner_id,
            influencer_id,
            binding,
            request_id,
            chat_status: start.chat_status(),
            flow_state: start,
            awaiting_role: start.awaiting_role(),
            final_agreed_amount: None,
            pending_offer: None,
            negotiation_round: 0,
            escrow_hold_id: None,
            gateway_order_id: None,
            version: 0,
            last_activity_at: now,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns `true` if the user takes part in this conversation.
    #[must_use]
    pub fn is_participant(&self, user: UserId) -> bool {
        user == self.brand_owner_id || user == self.influencer_id
    }

    /// Returns the conversation-local role of a participant.
    #[must_use]
    pub fn role_of(&self, user: UserId) -> Option<Role> {
        if user == self.brand_owner_id {
            Some(Role::BrandOwner)
        } else if user == self.influencer_id {
            Some(Role::Influencer)
        } else {
            None
        }
    }

    /// Returns the participant holding `role`.
    #[must_use]
    pub fn participant(&self, role: Role) -> Option<UserId> {
        match role {
            Role::BrandOwner => Some(self.brand_owner_id),
            Role::Influencer => Some(self.influencer_id),
            Role::Admin => None,
        }
    }

    /// Returns the other participant, or `None` for non-participants.
    #[must_use]
    pub fn counterpart(&self, user: UserId) -> Option<UserId> {
        if user == self.brand_owner_id {
            Some(self.influencer_id)
        } else if user == self.influencer_id {
            Some(self.brand_owner_id)
        } else {
            None
        }
    }

    /// Both participants, brand owner first.
    #[must_use]
    pub const fn participants(&self) -> [UserId; 2] {
        [self.brand_owner_id, self.influencer_id]
    }
}

/// A conversation together with both participants' profiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    /// The conversation row.
    pub conversation: Conversation,
    /// Brand-side profile.
    pub brand_owner: User,
    /// Influencer-side profile.
    pub influencer: User,
}

impl ConversationRecord {
    /// Profile of the participant other than `viewer`.
    #[must_use]
    pub fn other_user(&self, viewer: UserId) -> &User {
        if viewer == self.conversation.brand_owner_id {
            &self.influencer
        } else {
            &self.brand_owner
        }
    }
}
