//! Action messages: the structured input set a client renders as buttons.
//!
//! The server is authoritative. [`render`] derives the buttons from the
//! conversation's current flow state and round, and [`resolve_button`]
//! maps a click back to a [`Command`] by checking it against exactly those
//! buttons. Clients never choose the command kind themselves.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::command::{Command, CommandKind};
use super::conversation::{Conversation, FlowState};
use super::money::{Minor, format_minor};
use super::user::Role;
use crate::error::GatewayError;

/// UI component the client renders for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionComponent {
    /// Accept / counter / reject an offer.
    NegotiationRequest,
    /// Amount entry.
    PriceInput,
    /// Accept / continue / reject a negotiated price.
    FinalResponse,
    /// Engage with or decline a counter.
    CounterOffer,
    /// Start the gateway checkout.
    PaymentCta,
    /// Approve or request a revision.
    WorkReview,
    /// Plain button row.
    None,
}

/// Visual weight of a button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonKind {
    /// Main call to action.
    Primary,
    /// Alternative path.
    Secondary,
    /// Ends the negotiation.
    Danger,
}

/// Button identifier: a command kind, or the checkout trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ButtonId {
    /// Issues the command of the same name.
    Command(CommandKind),
    /// Creates a gateway order instead of a flow transition.
    InitiatePayment,
}

impl ButtonId {
    const INITIATE_PAYMENT: &'static str = "initiate_payment";

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Command(kind) => kind.as_str(),
            Self::InitiatePayment => Self::INITIATE_PAYMENT,
        }
    }

    /// Returns the command kind the button issues, if any.
    #[must_use]
    pub const fn command_kind(&self) -> Option<CommandKind> {
        match self {
            Self::Command(kind) => Some(*kind),
            Self::InitiatePayment => None,
        }
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ButtonId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::INITIATE_PAYMENT {
            return Ok(Self::InitiatePayment);
        }
        s.parse::<CommandKind>()
            .map(Self::Command)
            .map_err(|_| GatewayError::IllegalTransition(format!("unknown button: {s}")))
    }
}

impl TryFrom<String> for ButtonId {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ButtonId> for String {
    fn from(id: ButtonId) -> Self {
        id.as_str().to_string()
    }
}

/// One clickable button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    /// What the click does.
    pub id: ButtonId,
    /// Display label.
    pub label: String,
    /// Visual weight.
    pub kind: ButtonKind,
    /// The only role allowed to click it.
    pub enabled_for_role: Role,
}

impl Button {
    fn command(kind: CommandKind, weight: ButtonKind, role: Role) -> Self {
        Self {
            id: ButtonId::Command(kind),
            label: label_for(kind).to_string(),
            kind: weight,
            enabled_for_role: role,
        }
    }
}

/// Data shown alongside the buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParams {
    /// Amount on the table, in minor units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Minor>,
    /// Counter-offer rounds used.
    pub round: u32,
    /// Round cap.
    pub max_rounds: u32,
    /// `true` once the cap is reached and only accept/reject remain.
    #[serde(default)]
    pub final_offer: bool,
    /// Revision note from the brand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Submitted deliverables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

/// Structured action carried in an `automated` message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Component to render.
    pub component: ActionComponent,
    /// Displayed data.
    pub params: ActionParams,
    /// Legal inputs for the awaited participant.
    pub buttons: Vec<Button>,
}

impl Action {
    /// Returns the button with the given id.
    #[must_use]
    pub fn button(&self, id: ButtonId) -> Option<&Button> {
        self.buttons.iter().find(|b| b.id == id)
    }

    /// One-line summary for conversation lists.
    #[must_use]
    pub fn preview(&self) -> String {
        let amount = self.params.amount.map(format_minor);
        match (self.component, amount) {
            (ActionComponent::NegotiationRequest, Some(a)) => format!("Price offer: {a}"),
            (ActionComponent::CounterOffer, Some(a)) => format!("Counter offer: {a}"),
            (ActionComponent::FinalResponse, Some(a)) if self.params.final_offer => {
                format!("Final offer: {a}")
            }
            (ActionComponent::FinalResponse, Some(a)) => format!("Negotiated price: {a}"),
            (ActionComponent::PaymentCta, Some(a)) => format!("Payment due: {a}"),
            (ActionComponent::PriceInput, _) => "Enter your price".to_string(),
            (ActionComponent::WorkReview, _) => "Work submitted for review".to_string(),
            _ => self
                .buttons
                .first()
                .map_or_else(String::new, |b| b.label.clone()),
        }
    }
}

const fn label_for(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::SendPriceOffer | CommandKind::SendNegotiatedPrice => "Send offer",
        CommandKind::AcceptPrice | CommandKind::AcceptNegotiatedPrice => "Accept",
        CommandKind::RejectPrice
        | CommandKind::RejectNegotiatedPrice
        | CommandKind::RejectNegotiation => "Reject",
        CommandKind::NegotiatePrice | CommandKind::ContinueNegotiate => "Negotiate",
        CommandKind::AgreeNegotiation => "Let's negotiate",
        CommandKind::StartWork => "Start work",
        CommandKind::SubmitWork => "Submit work",
        CommandKind::ApproveWork => "Approve",
        CommandKind::RequestRevision => "Request changes",
        CommandKind::CloseChat => "Close chat",
        CommandKind::PaymentConfirmed
        | CommandKind::OpenChat
        | CommandKind::SendText
        | CommandKind::Timeout => "",
    }
}

/// Renders the legal input set for the conversation's current state.
///
/// Returns `None` when no participant input is legal (`work_approved`,
/// `real_time`, `closed`).
#[must_use]
pub fn render(conv: &Conversation, max_rounds: u32) -> Option<Action> {
    use ButtonKind::{Danger, Primary, Secondary};
    use CommandKind as K;

    let at_cap = conv.negotiation_round >= max_rounds;
    let brand = Role::BrandOwner;
    let influencer = Role::Influencer;

    let (component, amount, buttons) = match conv.flow_state {
        FlowState::InitialOffer => (
            ActionComponent::PriceInput,
            None,
            vec![Button::command(K::SendPriceOffer, Primary, brand)],
        ),
        FlowState::InfluencerPriceResponse => {
            let mut buttons = vec![Button::command(K::AcceptPrice, Primary, influencer)];
            if !at_cap {
                buttons.push(Button::command(K::NegotiatePrice, Secondary, influencer));
            }
            buttons.push(Button::command(K::RejectPrice, Danger, influencer));
            (ActionComponent::NegotiationRequest, conv.pending_offer, buttons)
        }
        FlowState::BrandOwnerNegotiation => (
            ActionComponent::CounterOffer,
            conv.pending_offer,
            vec![
                Button::command(K::AgreeNegotiation, Primary, brand),
                Button::command(K::RejectNegotiation, Danger, brand),
            ],
        ),
        FlowState::NegotiationInput => (
            ActionComponent::PriceInput,
            conv.pending_offer,
            vec![Button::command(K::SendNegotiatedPrice, Primary, brand)],
        ),
        FlowState::InfluencerFinalResponse => {
            let mut buttons = vec![Button::command(K::AcceptNegotiatedPrice, Primary, influencer)];
            if !at_cap {
                buttons.push(Button::command(K::ContinueNegotiate, Secondary, influencer));
            }
            buttons.push(Button::command(K::RejectNegotiatedPrice, Danger, influencer));
            (ActionComponent::FinalResponse, conv.pending_offer, buttons)
        }
        FlowState::BrandOwnerPricing => (
            ActionComponent::PriceInput,
            conv.pending_offer,
            vec![Button::command(K::SendPriceOffer, Primary, brand)],
        ),
        FlowState::PaymentPending => (
            ActionComponent::PaymentCta,
            conv.final_agreed_amount,
            vec![Button {
                id: ButtonId::InitiatePayment,
                label: "Pay now".to_string(),
                kind: Primary,
                enabled_for_role: brand,
            }],
        ),
        FlowState::PaymentCompleted => (
            ActionComponent::None,
            conv.final_agreed_amount,
            vec![
                Button::command(K::StartWork, Primary, influencer),
                Button::command(K::SubmitWork, Secondary, influencer),
            ],
        ),
        FlowState::WorkInProgress => (
            ActionComponent::None,
            conv.final_agreed_amount,
            vec![Button::command(K::SubmitWork, Primary, influencer)],
        ),
        FlowState::WorkSubmitted => (
            ActionComponent::WorkReview,
            conv.final_agreed_amount,
            vec![
                Button::command(K::ApproveWork, Primary, brand),
                Button::command(K::RequestRevision, Secondary, brand),
            ],
        ),
        FlowState::WorkApproved | FlowState::RealTime | FlowState::Closed => return None,
    };

    let final_offer = at_cap
        && matches!(
            conv.flow_state,
            FlowState::InfluencerPriceResponse | FlowState::InfluencerFinalResponse
        );

    Some(Action {
        component,
        params: ActionParams {
            amount,
            round: conv.negotiation_round,
            max_rounds,
            final_offer,
            note: None,
            attachments: Vec::new(),
        },
        buttons,
    })
}

/// What a resolved button click asks the service to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonIntent {
    /// Run a flow transition.
    Command(Command),
    /// Create a gateway checkout order.
    Checkout,
}

/// Resolves a button click against the buttons rendered for the current
/// state.
///
/// `payload` is only read for the field the command needs (`amount`,
/// `note` or `attachments`). Anything else the client sends is ignored.
///
/// # Errors
///
/// - [`GatewayError::IllegalTransition`] if the button is not rendered now.
/// - [`GatewayError::RoleMismatch`] if the button belongs to the other role.
/// - [`GatewayError::InvalidAmount`] if a price button carries no amount.
pub fn resolve_button(
    conv: &Conversation,
    max_rounds: u32,
    actor_role: Role,
    button_id: &str,
    payload: Option<&serde_json::Value>,
) -> Result<ButtonIntent, GatewayError> {
    let id: ButtonId = button_id.parse()?;
    let action = render(conv, max_rounds).ok_or_else(|| {
        GatewayError::IllegalTransition(format!(
            "no buttons are available in {}",
            conv.flow_state
        ))
    })?;
    let button = action.button(id).ok_or_else(|| {
        GatewayError::IllegalTransition(format!(
            "button {id} is not available in {}",
            conv.flow_state
        ))
    })?;
    if button.enabled_for_role != actor_role {
        return Err(GatewayError::RoleMismatch(format!(
            "button {id} is for the {}",
            button.enabled_for_role
        )));
    }
    match id {
        ButtonId::InitiatePayment => Ok(ButtonIntent::Checkout),
        ButtonId::Command(kind) => command_from_payload(kind, payload).map(ButtonIntent::Command),
    }
}

/// Builds a participant command from its kind and a loose JSON payload.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidAmount`] when a price command has no
/// readable amount and [`GatewayError::IllegalTransition`] for
/// system-only kinds.
pub fn command_from_payload(
    kind: CommandKind,
    payload: Option<&serde_json::Value>,
) -> Result<Command, GatewayError> {
    let amount = || {
        read_amount(payload).ok_or_else(|| {
            GatewayError::InvalidAmount(format!("{kind} requires an integer amount"))
        })
    };
    let command = match kind {
        CommandKind::SendPriceOffer => Command::SendPriceOffer { amount: amount()? },
        CommandKind::NegotiatePrice => Command::NegotiatePrice { amount: amount()? },
        CommandKind::SendNegotiatedPrice => Command::SendNegotiatedPrice { amount: amount()? },
        CommandKind::ContinueNegotiate => Command::ContinueNegotiate { amount: amount()? },
        CommandKind::AcceptPrice => Command::AcceptPrice,
        CommandKind::RejectPrice => Command::RejectPrice,
        CommandKind::AgreeNegotiation => Command::AgreeNegotiation,
        CommandKind::RejectNegotiation => Command::RejectNegotiation,
        CommandKind::AcceptNegotiatedPrice => Command::AcceptNegotiatedPrice,
        CommandKind::RejectNegotiatedPrice => Command::RejectNegotiatedPrice,
        CommandKind::StartWork => Command::StartWork,
        CommandKind::ApproveWork => Command::ApproveWork,
        CommandKind::CloseChat => Command::CloseChat,
        CommandKind::SubmitWork => Command::SubmitWork {
            attachments: read_attachments(payload),
        },
        CommandKind::RequestRevision => Command::RequestRevision {
            note: read_str(payload, "note").unwrap_or_default(),
        },
        CommandKind::SendText => Command::SendText {
            body: read_str(payload, "body").unwrap_or_default(),
        },
        CommandKind::PaymentConfirmed | CommandKind::OpenChat | CommandKind::Timeout => {
            return Err(GatewayError::IllegalTransition(format!(
                "{kind} cannot be issued by a participant"
            )));
        }
    };
    Ok(command)
}

fn as_amount(value: &serde_json::Value) -> Option<Minor> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn read_amount(payload: Option<&serde_json::Value>) -> Option<Minor> {
    let payload = payload?;
    match payload {
        serde_json::Value::Object(map) => map.get("amount").and_then(as_amount),
        other => as_amount(other),
    }
}

fn read_str(payload: Option<&serde_json::Value>, field: &str) -> Option<String> {
    payload?
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

fn read_attachments(payload: Option<&serde_json::Value>) -> Vec<String> {
    payload
        .and_then(|p| p.get("attachments"))
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::UserId;
    use crate::domain::conversation::Binding;

    fn conv_in(state: FlowState, round: u32) -> Conversation {
        let Ok(mut conv) = Conversation::new(
            UserId::new(),
            UserId::new(),
            Binding::Direct,
            None,
            FlowState::InitialOffer,
        ) else {
            panic!("valid conversation");
        };
        conv.flow_state = state;
        conv.awaiting_role = state.awaiting_role();
        conv.chat_status = state.chat_status();
        conv.negotiation_round = round;
        conv.pending_offer = Some(500_000);
        conv
    }

    fn ids(action: &Action) -> Vec<&'static str> {
        action.buttons.iter().map(|b| b.id.as_str()).collect()
    }

    #[test]
    fn price_response_offers_counter_below_cap() {
        let Some(action) = render(&conv_in(FlowState::InfluencerPriceResponse, 1), 3) else {
            panic!("action expected");
        };
        assert_eq!(action.component, ActionComponent::NegotiationRequest);
        assert_eq!(ids(&action), ["accept_price", "negotiate_price", "reject_price"]);
        assert_eq!(action.params.amount, Some(500_000));
        assert!(!action.params.final_offer);
    }

    #[test]
    fn final_response_at_cap_is_accept_or_reject() {
        let Some(action) = render(&conv_in(FlowState::InfluencerFinalResponse, 3), 3) else {
            panic!("action expected");
        };
        assert_eq!(ids(&action), ["accept_negotiated_price", "reject_negotiated_price"]);
        assert!(action.params.final_offer);
        assert!(action.preview().starts_with("Final offer"));
    }

    #[test]
    fn payment_pending_renders_checkout() {
        let mut conv = conv_in(FlowState::PaymentPending, 0);
        conv.final_agreed_amount = Some(300_000);
        let Some(action) = render(&conv, 3) else {
            panic!("action expected");
        };
        assert_eq!(action.component, ActionComponent::PaymentCta);
        assert_eq!(ids(&action), ["initiate_payment"]);
        assert_eq!(action.preview(), "Payment due: 3000.00");
    }

    #[test]
    fn free_chat_states_render_nothing() {
        for state in [FlowState::WorkApproved, FlowState::RealTime, FlowState::Closed] {
            assert!(render(&conv_in(state, 0), 3).is_none());
        }
    }

    #[test]
    fn every_rendered_button_belongs_to_the_awaited_role() {
        for state in FlowState::ALL {
            let conv = conv_in(state, 0);
            if let Some(action) = render(&conv, 3) {
                for button in &action.buttons {
                    assert_eq!(Some(button.enabled_for_role), state.awaiting_role().role());
                }
            }
        }
    }

    #[test]
    fn additional_data_cannot_change_the_command() {
        let conv = conv_in(FlowState::BrandOwnerNegotiation, 1);
        let payload = serde_json::json!({"additional_data": {"action": "reject"}});
        let Ok(intent) =
            resolve_button(&conv, 3, Role::BrandOwner, "agree_negotiation", Some(&payload))
        else {
            panic!("button should resolve");
        };
        assert_eq!(intent, ButtonIntent::Command(Command::AgreeNegotiation));
    }

    #[test]
    fn button_for_other_role_is_a_role_mismatch() {
        let conv = conv_in(FlowState::BrandOwnerNegotiation, 1);
        let result = resolve_button(&conv, 3, Role::Influencer, "agree_negotiation", None);
        assert!(matches!(result, Err(GatewayError::RoleMismatch(_))));
    }

    #[test]
    fn unrendered_button_is_illegal() {
        let conv = conv_in(FlowState::InfluencerFinalResponse, 3);
        let payload = serde_json::json!({"amount": 650000});
        let result = resolve_button(&conv, 3, Role::Influencer, "continue_negotiate", Some(&payload));
        assert!(matches!(result, Err(GatewayError::IllegalTransition(_))));
        let result = resolve_button(&conv, 3, Role::Influencer, "bogus", None);
        assert!(matches!(result, Err(GatewayError::IllegalTransition(_))));
    }

    #[test]
    fn amount_is_read_from_number_or_string() {
        let conv = conv_in(FlowState::InfluencerPriceResponse, 0);
        for payload in [
            serde_json::json!({"amount": 700000}),
            serde_json::json!({"amount": "700000"}),
            serde_json::json!(700000),
        ] {
            let Ok(intent) =
                resolve_button(&conv, 3, Role::Influencer, "negotiate_price", Some(&payload))
            else {
                panic!("button should resolve for {payload}");
            };
            assert_eq!(
                intent,
                ButtonIntent::Command(Command::NegotiatePrice { amount: 700_000 })
            );
        }
    }

    #[test]
    fn price_button_without_amount_is_invalid() {
        let conv = conv_in(FlowState::InitialOffer, 0);
        let result = resolve_button(&conv, 3, Role::BrandOwner, "send_price_offer", None);
        assert!(matches!(result, Err(GatewayError::InvalidAmount(_))));
    }

    #[test]
    fn initiate_payment_resolves_to_checkout() {
        let conv = conv_in(FlowState::PaymentPending, 0);
        let Ok(intent) = resolve_button(&conv, 3, Role::BrandOwner, "initiate_payment", None) else {
            panic!("checkout button should resolve");
        };
        assert_eq!(intent, ButtonIntent::Checkout);
    }

    #[test]
    fn button_ids_serialize_as_strings() {
        let Ok(json) = serde_json::to_value(ButtonId::InitiatePayment) else {
            panic!("serializable");
        };
        assert_eq!(json, serde_json::json!("initiate_payment"));
        let Ok(id) = serde_json::from_value::<ButtonId>(serde_json::json!("approve_work")) else {
            panic!("deserializable");
        };
        assert_eq!(id, ButtonId::Command(CommandKind::ApproveWork));
    }
}
