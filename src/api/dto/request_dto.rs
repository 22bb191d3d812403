//! Influencer request DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::conversation::Binding;
use crate::domain::request::{Request, RequestStatus};
use crate::error::GatewayError;

/// Request body for `POST /requests`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateRequestRequest {
    /// Owner of the campaign or bid.
    pub brand_owner_id: Uuid,
    /// Campaign applied to. Exactly one of `campaign_id` and `bid_id`.
    pub campaign_id: Option<Uuid>,
    /// Bid applied to.
    pub bid_id: Option<Uuid>,
}

impl CreateRequestRequest {
    /// The binding the request targets.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] unless exactly one id is set.
    pub fn binding(&self) -> Result<Binding, GatewayError> {
        match Binding::from_columns(self.campaign_id, self.bid_id)? {
            Binding::Direct => Err(GatewayError::InvalidRequest(
                "campaign_id or bid_id is required".to_string(),
            )),
            binding => Ok(binding),
        }
    }
}

/// A stored request.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RequestResponse {
    /// Request id.
    pub request_id: Uuid,
    /// Applicant.
    pub influencer_id: Uuid,
    /// Brand owner.
    pub brand_owner_id: Uuid,
    /// Campaign, if bound to one.
    pub campaign_id: Option<Uuid>,
    /// Bid, if bound to one.
    pub bid_id: Option<Uuid>,
    /// Lifecycle status.
    pub status: RequestStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<Request> for RequestResponse {
    fn from(request: Request) -> Self {
        let (campaign_id, bid_id) = request.binding.columns();
        Self {
            request_id: request.id.into(),
            influencer_id: request.influencer_id.into(),
            brand_owner_id: request.brand_owner_id.into(),
            campaign_id,
            bid_id,
            status: request.status,
            created_at: request.created_at,
        }
    }
}
