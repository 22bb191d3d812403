//! Flow engine inputs.
//!
//! A [`Command`] is the normalized form of an HTTP write, a socket event,
//! a gateway webhook or a sweeper tick. Client-originated commands
//! deserialize from the `action_response` shape
//! `{"action": "send_price_offer", "amount": 300000}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::money::Minor;
use super::{ConversationId, UserId};
use crate::error::GatewayError;

/// Discriminant of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Brand sends a price.
    SendPriceOffer,
    /// Influencer accepts the brand's offer.
    AcceptPrice,
    /// Influencer rejects the brand's offer.
    RejectPrice,
    /// Influencer counters the brand's offer.
    NegotiatePrice,
    /// Brand engages with the influencer's counter.
    AgreeNegotiation,
    /// Brand declines to negotiate.
    RejectNegotiation,
    /// Brand sends the negotiated price.
    SendNegotiatedPrice,
    /// Influencer accepts the negotiated price.
    AcceptNegotiatedPrice,
    /// Influencer rejects the negotiated price.
    RejectNegotiatedPrice,
    /// Influencer counters the negotiated price.
    ContinueNegotiate,
    /// Gateway confirmed the brand's payment.
    PaymentConfirmed,
    /// Influencer starts working.
    StartWork,
    /// Influencer submits deliverables.
    SubmitWork,
    /// Brand approves the deliverables.
    ApproveWork,
    /// Brand asks for changes.
    RequestRevision,
    /// Platform opens free-form chat after approval.
    OpenChat,
    /// Free-form text in real-time chat.
    SendText,
    /// Either participant closes a real-time chat.
    CloseChat,
    /// Idle negotiation timeout.
    Timeout,
}

impl CommandKind {
    /// Every command kind.
    pub const ALL: [Self; 19] = [
        Self::SendPriceOffer,
        Self::AcceptPrice,
        Self::RejectPrice,
        Self::NegotiatePrice,
        Self::AgreeNegotiation,
        Self::RejectNegotiation,
        Self::SendNegotiatedPrice,
        Self::AcceptNegotiatedPrice,
        Self::RejectNegotiatedPrice,
        Self::ContinueNegotiate,
        Self::PaymentConfirmed,
        Self::StartWork,
        Self::SubmitWork,
        Self::ApproveWork,
        Self::RequestRevision,
        Self::OpenChat,
        Self::SendText,
        Self::CloseChat,
        Self::Timeout,
    ];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SendPriceOffer => "send_price_offer",
            Self::AcceptPrice => "accept_price",
            Self::RejectPrice => "reject_price",
            Self::NegotiatePrice => "negotiate_price",
            Self::AgreeNegotiation => "agree_negotiation",
            Self::RejectNegotiation => "reject_negotiation",
            Self::SendNegotiatedPrice => "send_negotiated_price",
            Self::AcceptNegotiatedPrice => "accept_negotiated_price",
            Self::RejectNegotiatedPrice => "reject_negotiated_price",
            Self::ContinueNegotiate => "continue_negotiate",
            Self::PaymentConfirmed => "payment_confirmed",
            Self::StartWork => "start_work",
            Self::SubmitWork => "submit_work",
            Self::ApproveWork => "approve_work",
            Self::RequestRevision => "request_revision",
            Self::OpenChat => "open_chat",
            Self::SendText => "send_text",
            Self::CloseChat => "close_chat",
            Self::Timeout => "timeout",
        }
    }

    /// Commands only the platform may issue.
    #[must_use]
    pub const fn is_system_only(&self) -> bool {
        matches!(self, Self::PaymentConfirmed | Self::OpenChat | Self::Timeout)
    }

    /// Commands that carry a price.
    #[must_use]
    pub const fn carries_amount(&self) -> bool {
        matches!(
            self,
            Self::SendPriceOffer
                | Self::NegotiatePrice
                | Self::SendNegotiatedPrice
                | Self::ContinueNegotiate
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| GatewayError::IllegalTransition(format!("unknown command: {s}")))
    }
}

/// A flow engine input with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Brand sends a price.
    SendPriceOffer {
        /// Offered amount in minor units.
        amount: Minor,
    },
    /// Influencer accepts the brand's offer.
    AcceptPrice,
    /// Influencer rejects the brand's offer.
    RejectPrice,
    /// Influencer counters the brand's offer.
    NegotiatePrice {
        /// Counter amount in minor units.
        amount: Minor,
    },
    /// Brand engages with the influencer's counter.
    AgreeNegotiation,
    /// Brand declines to negotiate.
    RejectNegotiation,
    /// Brand sends the negotiated price.
    SendNegotiatedPrice {
        /// Negotiated amount in minor units.
        amount: Minor,
    },
    /// Influencer accepts the negotiated price.
    AcceptNegotiatedPrice,
    /// Influencer rejects the negotiated price.
    RejectNegotiatedPrice,
    /// Influencer counters the negotiated price.
    ContinueNegotiate {
        /// Counter amount in minor units.
        amount: Minor,
    },
    /// Gateway confirmed the brand's payment.
    PaymentConfirmed {
        /// Gateway payment id.
        gateway_payment_id: String,
    },
    /// Influencer starts working.
    StartWork,
    /// Influencer submits deliverables.
    SubmitWork {
        /// URLs of uploaded deliverables.
        attachments: Vec<String>,
    },
    /// Brand approves the deliverables.
    ApproveWork,
    /// Brand asks for changes.
    RequestRevision {
        /// What should change.
        #[serde(default)]
        note: String,
    },
    /// Platform opens free-form chat after approval.
    OpenChat,
    /// Free-form text.
    SendText {
        /// Message text.
        body: String,
    },
    /// Close a real-time chat.
    CloseChat,
    /// Idle negotiation timeout.
    Timeout,
}

impl Command {
    /// Returns the command discriminant.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::SendPriceOffer { .. } => CommandKind::SendPriceOffer,
            Self::AcceptPrice => CommandKind::AcceptPrice,
            Self::RejectPrice => CommandKind::RejectPrice,
            Self::NegotiatePrice { .. } => CommandKind::NegotiatePrice,
            Self::AgreeNegotiation => CommandKind::AgreeNegotiation,
            Self::RejectNegotiation => CommandKind::RejectNegotiation,
            Self::SendNegotiatedPrice { .. } => CommandKind::SendNegotiatedPrice,
            Self::AcceptNegotiatedPrice => CommandKind::AcceptNegotiatedPrice,
            Self::RejectNegotiatedPrice => CommandKind::RejectNegotiatedPrice,
            Self::ContinueNegotiate { .. } => CommandKind::ContinueNegotiate,
            Self::PaymentConfirmed { .. } => CommandKind::PaymentConfirmed,
            Self::StartWork => CommandKind::StartWork,
            Self::SubmitWork { .. } => CommandKind::SubmitWork,
            Self::ApproveWork => CommandKind::ApproveWork,
            Self::RequestRevision { .. } => CommandKind::RequestRevision,
            Self::OpenChat => CommandKind::OpenChat,
            Self::SendText { .. } => CommandKind::SendText,
            Self::CloseChat => CommandKind::CloseChat,
            Self::Timeout => CommandKind::Timeout,
        }
    }

    /// Returns the price carried by the command, if any.
    #[must_use]
    pub const fn amount(&self) -> Option<Minor> {
        match self {
            Self::SendPriceOffer { amount }
            | Self::NegotiatePrice { amount }
            | Self::SendNegotiatedPrice { amount }
            | Self::ContinueNegotiate { amount } => Some(*amount),
            _ => None,
        }
    }
}

/// Who issued a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    /// An authenticated user.
    Participant(UserId),
    /// The platform: webhooks, the idle sweeper, auto-advances.
    System,
}

impl Actor {
    /// Returns the user id for participant actors.
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Participant(id) => Some(*id),
            Self::System => None,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Participant(id) => write!(f, "user:{id}"),
            Self::System => f.write_str("system"),
        }
    }
}

/// A command addressed to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// Issuer.
    pub actor: Actor,
    /// The command.
    pub command: Command,
}
