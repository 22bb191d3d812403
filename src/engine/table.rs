//! The transition table.
//!
//! Every legal `(from, command, to)` triple is listed once. The planner
//! picks its target from here and re-checks the triple it produced, so a
//! state the table does not know can never be committed.

use crate::domain::command::CommandKind;
use crate::domain::conversation::FlowState;

/// One legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Source state.
    pub from: FlowState,
    /// Command that fires it.
    pub command: CommandKind,
    /// Target state.
    pub to: FlowState,
}

const fn edge(from: FlowState, command: CommandKind, to: FlowState) -> Edge {
    Edge { from, command, to }
}

use CommandKind as C;
use FlowState as S;

/// All legal transitions.
pub const EDGES: &[Edge] = &[
    edge(S::InitialOffer, C::SendPriceOffer, S::InfluencerPriceResponse),
    edge(S::InfluencerPriceResponse, C::AcceptPrice, S::PaymentPending),
    edge(S::InfluencerPriceResponse, C::RejectPrice, S::Closed),
    edge(S::InfluencerPriceResponse, C::NegotiatePrice, S::BrandOwnerNegotiation),
    edge(S::BrandOwnerNegotiation, C::AgreeNegotiation, S::NegotiationInput),
    edge(S::BrandOwnerNegotiation, C::RejectNegotiation, S::Closed),
    edge(S::NegotiationInput, C::SendNegotiatedPrice, S::InfluencerFinalResponse),
    edge(S::InfluencerFinalResponse, C::AcceptNegotiatedPrice, S::PaymentPending),
    edge(S::InfluencerFinalResponse, C::RejectNegotiatedPrice, S::Closed),
    edge(S::InfluencerFinalResponse, C::ContinueNegotiate, S::BrandOwnerPricing),
    edge(S::InfluencerFinalResponse, C::ContinueNegotiate, S::InfluencerFinalResponse),
    edge(S::BrandOwnerPricing, C::SendPriceOffer, S::InfluencerPriceResponse),
    edge(S::PaymentPending, C::PaymentConfirmed, S::PaymentCompleted),
    edge(S::PaymentCompleted, C::StartWork, S::WorkInProgress),
    edge(S::PaymentCompleted, C::SubmitWork, S::WorkSubmitted),
    edge(S::WorkInProgress, C::SubmitWork, S::WorkSubmitted),
    edge(S::WorkSubmitted, C::ApproveWork, S::WorkApproved),
    edge(S::WorkSubmitted, C::RequestRevision, S::WorkInProgress),
    edge(S::WorkApproved, C::OpenChat, S::RealTime),
    edge(S::RealTime, C::SendText, S::RealTime),
    edge(S::RealTime, C::CloseChat, S::Closed),
    edge(S::InitialOffer, C::Timeout, S::Closed),
    edge(S::InfluencerPriceResponse, C::Timeout, S::Closed),
    edge(S::BrandOwnerNegotiation, C::Timeout, S::Closed),
    edge(S::NegotiationInput, C::Timeout, S::Closed),
    edge(S::InfluencerFinalResponse, C::Timeout, S::Closed),
    edge(S::BrandOwnerPricing, C::Timeout, S::Closed),
    edge(S::PaymentPending, C::Timeout, S::Closed),
    edge(S::PaymentCompleted, C::Timeout, S::Closed),
    edge(S::WorkInProgress, C::Timeout, S::Closed),
];

/// Targets reachable from `from` with `command`.
pub fn targets(from: FlowState, command: CommandKind) -> impl Iterator<Item = FlowState> {
    EDGES
        .iter()
        .filter(move |e| e.from == from && e.command == command)
        .map(|e| e.to)
}

/// Command kinds accepted in `state`, in table order without duplicates.
#[must_use]
pub fn legal_commands(state: FlowState) -> Vec<CommandKind> {
    let mut kinds = Vec::new();
    for e in EDGES.iter().filter(|e| e.from == state) {
        if !kinds.contains(&e.command) {
            kinds.push(e.command);
        }
    }
    kinds
}

/// Whether the triple is in the table.
#[must_use]
pub fn is_edge(from: FlowState, command: CommandKind, to: FlowState) -> bool {
    EDGES
        .iter()
        .any(|e| e.from == from && e.command == command && e.to == to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_terminal() {
        assert!(legal_commands(FlowState::Closed).is_empty());
    }

    #[test]
    fn timeout_edges_match_sweeper_eligibility() {
        for state in FlowState::ALL {
            assert_eq!(
                is_edge(state, CommandKind::Timeout, FlowState::Closed),
                state.is_timeout_eligible(),
                "{state}"
            );
        }
    }

    #[test]
    fn every_non_terminal_state_has_an_exit() {
        for state in FlowState::ALL {
            if state != FlowState::Closed {
                assert!(!legal_commands(state).is_empty(), "{state}");
            }
        }
    }

    #[test]
    fn continue_negotiate_has_two_targets() {
        let to: Vec<_> =
            targets(FlowState::InfluencerFinalResponse, CommandKind::ContinueNegotiate).collect();
        assert_eq!(
            to,
            vec![FlowState::BrandOwnerPricing, FlowState::InfluencerFinalResponse]
        );
    }

    #[test]
    fn work_approved_only_opens_chat() {
        assert_eq!(legal_commands(FlowState::WorkApproved), vec![CommandKind::OpenChat]);
    }
}
