//! Row shapes for the PostgreSQL store and their conversion to domain types.
//!
//! Rows are plain tuples decoded with `sqlx::query_as`; the `*_COLUMNS`
//! constants keep the select lists in the same order as the tuples.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::conversation::{Binding, Conversation, FlowState};
use crate::domain::ledger::{LedgerEntry, LedgerRefs, Wallet};
use crate::domain::message::{Message, MessageBody};
use crate::domain::payment::{OrderPurpose, PaymentOrder};
use crate::domain::request::Request;
use crate::domain::settings::SettingAudit;
use crate::domain::user::User;
use crate::error::GatewayError;

pub(crate) const USER_COLUMNS: &str = "id, role, display_name, avatar_url";

pub(crate) type UserRow = (Uuid, String, String, Option<String>);

pub(crate) fn user(row: UserRow) -> Result<User, GatewayError> {
    let (id, role, display_name, avatar_url) = row;
    Ok(User {
        id: id.into(),
        role: role.parse()?,
        display_name,
        avatar_url,
    })
}

pub(crate) const REQUEST_COLUMNS: &str =
    "id, influencer_id, brand_owner_id, campaign_id, bid_id, status, created_at, updated_at";

pub(crate) type RequestRow = (
    Uuid,
    Uuid,
    Uuid,
    Option<Uuid>,
    Option<Uuid>,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);

pub(crate) fn request(row: RequestRow) -> Result<Request, GatewayError> {
    let (id, influencer_id, brand_owner_id, campaign_id, bid_id, status, created_at, updated_at) =
        row;
    Ok(Request {
        id: id.into(),
        influencer_id: influencer_id.into(),
        brand_owner_id: brand_owner_id.into(),
        binding: Binding::from_columns(campaign_id, bid_id)?,
        status: status.parse()?,
        created_at,
        updated_at,
    })
}

pub(crate) const CONVERSATION_COLUMNS: &str = "id, brand_owner_id, influencer_id, campaign_id, \
     bid_id, request_id, flow_state, final_agreed_amount, pending_offer, negotiation_round, \
     escrow_hold_id, gateway_order_id, version, last_activity_at, created_at, updated_at";

pub(crate) type ConversationRow = (
    Uuid,
    Uuid,
    Uuid,
    Option<Uuid>,
    Option<Uuid>,
    Option<Uuid>,
    String,
    Option<i64>,
    Option<i64>,
    i32,
    Option<Uuid>,
    Option<String>,
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// `chat_status` and `awaiting_role` are stored for queries but always
/// rebuilt from `flow_state` on read.
pub(crate) fn conversation(row: ConversationRow) -> Result<Conversation, GatewayError> {
    let (
        id,
        brand_owner_id,
        influencer_id,
        campaign_id,
        bid_id,
        request_id,
        flow_state,
        final_agreed_amount,
        pending_offer,
        negotiation_round,
        escrow_hold_id,
        gateway_order_id,
        version,
        last_activity_at,
        created_at,
        updated_at,
    ) = row;
    let flow_state: FlowState = flow_state.parse()?;
    Ok(Conversation {
        id: id.into(),
        brand_owner_id: brand_owner_id.into(),
        influencer_id: influencer_id.into(),
        binding: Binding::from_columns(campaign_id, bid_id)?,
        request_id: request_id.map(Into::into),
        chat_status: flow_state.chat_status(),
        flow_state,
        awaiting_role: flow_state.awaiting_role(),
        final_agreed_amount,
        pending_offer,
        negotiation_round: u32::try_from(negotiation_round)
            .map_err(|_| GatewayError::Internal(format!("negative round on {id}")))?,
        escrow_hold_id: escrow_hold_id.map(Into::into),
        gateway_order_id,
        version: u64::try_from(version)
            .map_err(|_| GatewayError::Internal(format!("negative version on {id}")))?,
        last_activity_at,
        created_at,
        updated_at,
    })
}

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, receiver_id, body, message_type, seen, created_at";

pub(crate) type MessageRow = (
    Uuid,
    Uuid,
    Uuid,
    Uuid,
    serde_json::Value,
    String,
    bool,
    DateTime<Utc>,
);

pub(crate) fn message(row: MessageRow) -> Result<Message, GatewayError> {
    let (id, conversation_id, sender_id, receiver_id, body, message_type, seen, created_at) = row;
    let body: MessageBody = serde_json::from_value(body)
        .map_err(|e| GatewayError::Internal(format!("malformed body on message {id}: {e}")))?;
    Ok(Message {
        id: id.into(),
        conversation_id: conversation_id.into(),
        sender_id: sender_id.into(),
        receiver_id: receiver_id.into(),
        body,
        message_type: message_type.parse()?,
        seen,
        created_at,
    })
}

pub(crate) fn message_body(body: &MessageBody) -> Result<serde_json::Value, GatewayError> {
    serde_json::to_value(body).map_err(|e| GatewayError::Internal(e.to_string()))
}

pub(crate) const WALLET_COLUMNS: &str = "user_id, available, frozen, withdrawn";

pub(crate) type WalletRow = (Uuid, i64, i64, i64);

pub(crate) fn wallet(row: WalletRow) -> Wallet {
    let (user_id, available, frozen, withdrawn) = row;
    Wallet {
        user_id: user_id.into(),
        available,
        frozen,
        withdrawn,
    }
}

pub(crate) const LEDGER_COLUMNS: &str = "id, user_id, direction, kind, amount_minor, status, \
     conversation_id, request_id, gateway_payment_id, hold_id, created_at";

pub(crate) type LedgerRow = (
    Uuid,
    Uuid,
    String,
    String,
    i64,
    String,
    Option<Uuid>,
    Option<Uuid>,
    Option<String>,
    Option<Uuid>,
    DateTime<Utc>,
);

pub(crate) fn ledger_entry(row: LedgerRow) -> Result<LedgerEntry, GatewayError> {
    let (
        id,
        user_id,
        direction,
        kind,
        amount_minor,
        status,
        conversation_id,
        request_id,
        gateway_payment_id,
        hold_id,
        created_at,
    ) = row;
    Ok(LedgerEntry {
        id: id.into(),
        user_id: user_id.into(),
        direction: direction.parse()?,
        kind: kind.parse()?,
        amount_minor,
        status: status.parse()?,
        refs: LedgerRefs {
            conversation_id: conversation_id.map(Into::into),
            request_id: request_id.map(Into::into),
            gateway_payment_id,
            hold_id: hold_id.map(Into::into),
        },
        created_at,
    })
}

pub(crate) const ORDER_COLUMNS: &str = "id, gateway_order_id, user_id, purpose, conversation_id, \
     amount_minor, currency, status, gateway_payment_id, created_at, updated_at";

pub(crate) type OrderRow = (
    Uuid,
    String,
    Uuid,
    String,
    Option<Uuid>,
    i64,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

pub(crate) fn order(row: OrderRow) -> Result<PaymentOrder, GatewayError> {
    let (
        id,
        gateway_order_id,
        user_id,
        purpose,
        conversation_id,
        amount_minor,
        currency,
        status,
        gateway_payment_id,
        created_at,
        updated_at,
    ) = row;
    Ok(PaymentOrder {
        id: id.into(),
        gateway_order_id,
        user_id: user_id.into(),
        purpose: OrderPurpose::from_columns(&purpose, conversation_id.map(Into::into))?,
        amount_minor,
        currency,
        status: status.parse()?,
        gateway_payment_id,
        created_at,
        updated_at,
    })
}

pub(crate) type AuditRow = (String, Option<String>, String, Uuid, DateTime<Utc>);

pub(crate) fn audit(row: AuditRow) -> SettingAudit {
    let (key, old_value, new_value, changed_by, changed_at) = row;
    SettingAudit {
        key,
        old_value,
        new_value,
        changed_by: changed_by.into(),
        changed_at,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::message::MessageType;

    #[test]
    fn conversation_row_derives_status_columns() {
        let now = Utc::now();
        let row: ConversationRow = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            None,
            None,
            "influencer_price_response".to_string(),
            None,
            Some(300_000),
            0,
            None,
            None,
            4,
            now,
            now,
            now,
        );
        let Ok(conv) = conversation(row) else {
            panic!("valid row");
        };
        assert_eq!(conv.flow_state, FlowState::InfluencerPriceResponse);
        assert_eq!(conv.awaiting_role, FlowState::InfluencerPriceResponse.awaiting_role());
        assert_eq!(conv.version, 4);
        assert!(matches!(conv.binding, Binding::Campaign(_)));
    }

    #[test]
    fn negative_version_is_rejected() {
        let now = Utc::now();
        let row: ConversationRow = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            None,
            None,
            "real_time".to_string(),
            None,
            None,
            0,
            None,
            None,
            -1,
            now,
            now,
            now,
        );
        assert!(matches!(conversation(row), Err(GatewayError::Internal(_))));
    }

    #[test]
    fn message_body_survives_the_jsonb_column() {
        let body = MessageBody::text("hi");
        let Ok(json) = message_body(&body) else {
            panic!("serializable");
        };
        let row: MessageRow = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            json,
            "user_input".to_string(),
            false,
            Utc::now(),
        );
        let Ok(message) = message(row) else {
            panic!("valid row");
        };
        assert_eq!(message.body, body);
        assert_eq!(message.message_type, MessageType::UserInput);
    }
}
