//! Influencer applications to campaigns and bids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::conversation::{Binding, FlowState};
use super::{RequestId, UserId};
use crate::error::GatewayError;

/// Request lifecycle, mirrored from the conversation's flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Influencer applied.
    Applied,
    /// Brand opened a conversation.
    Connected,
    /// Price negotiation or payment pending.
    Negotiating,
    /// Escrow funded.
    Paid,
    /// Work delivered.
    WorkSubmitted,
    /// Work accepted, funds released.
    WorkApproved,
    /// Collaboration finished.
    Completed,
    /// Negotiation ended without a deal.
    Rejected,
}

impl RequestStatus {
    /// Every status.
    pub const ALL: [Self; 8] = [
        Self::Applied,
        Self::Connected,
        Self::Negotiating,
        Self::Paid,
        Self::WorkSubmitted,
        Self::WorkApproved,
        Self::Completed,
        Self::Rejected,
    ];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Connected => "connected",
            Self::Negotiating => "negotiating",
            Self::Paid => "paid",
            Self::WorkSubmitted => "work_submitted",
            Self::WorkApproved => "work_approved",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    /// Status a request takes when its conversation enters `state`.
    /// A completed request stays completed if the chat is later closed.
    #[must_use]
    pub const fn for_flow(state: FlowState, current: Self) -> Self {
        match state {
            FlowState::InitialOffer => Self::Connected,
            FlowState::InfluencerPriceResponse
            | FlowState::BrandOwnerNegotiation
            | FlowState::NegotiationInput
            | FlowState::InfluencerFinalResponse
            | FlowState::BrandOwnerPricing
            | FlowState::PaymentPending => Self::Negotiating,
            FlowState::PaymentCompleted | FlowState::WorkInProgress => Self::Paid,
            FlowState::WorkSubmitted => Self::WorkSubmitted,
            FlowState::WorkApproved => Self::WorkApproved,
            FlowState::RealTime => Self::Completed,
            FlowState::Closed => match current {
                Self::Completed => Self::Completed,
                _ => Self::Rejected,
            },
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| GatewayError::Internal(format!("unknown request status: {s}")))
    }
}

/// An influencer's application to a campaign or bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Request id.
    pub id: RequestId,
    /// Applicant.
    pub influencer_id: UserId,
    /// Owner of the campaign or bid.
    pub brand_owner_id: UserId,
    /// Campaign or bid applied to.
    pub binding: Binding,
    /// Lifecycle status.
    pub status: RequestStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Request {
    /// Creates an `applied` request.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] for a direct binding or when both
    /// sides are the same user.
    pub fn apply(
        influencer_id: UserId,
        brand_owner_id: UserId,
        binding: Binding,
    ) -> Result<Self, GatewayError> {
        if binding == Binding::Direct {
            return Err(GatewayError::InvalidRequest(
                "a request must reference a campaign or a bid".to_string(),
            ));
        }
        if influencer_id == brand_owner_id {
            return Err(GatewayError::InvalidRequest(
                "cannot apply to your own campaign".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: RequestId::new(),
            influencer_id,
            brand_owner_id,
            binding,
            status: RequestStatus::Applied,
            created_at: now,
            updated_at: now,
        })
    }
}
