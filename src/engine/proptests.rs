//! Property-based tests for the flow engine and the escrow ledger.
//!
//! Random command sequences from random actors are planned against a
//! conversation; accepted plans are applied and the state invariants are
//! checked after every step.

use chrono::Utc;
use proptest::prelude::*;

use super::flow::{FlowPolicy, plan};
use super::table;
use crate::domain::command::{Actor, Command};
use crate::domain::conversation::{Binding, Conversation, FlowState};
use crate::domain::ledger::{LedgerBook, LedgerEffect, LedgerRefs, Wallet};
use crate::domain::money::Minor;
use crate::domain::{LedgerEntryId, UserId};

#[derive(Debug, Clone, Copy)]
enum Who {
    Brand,
    Influencer,
    Outsider,
    System,
}

fn arb_who() -> impl Strategy<Value = Who> {
    prop_oneof![
        4 => Just(Who::Brand),
        4 => Just(Who::Influencer),
        1 => Just(Who::Outsider),
        2 => Just(Who::System),
    ]
}

fn arb_amount() -> impl Strategy<Value = Minor> {
    prop_oneof![
        8 => 100i64..5_000_000,
        1 => -1_000i64..100,
        1 => 1_000_000_001i64..2_000_000_000,
    ]
}

fn arb_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        arb_amount().prop_map(|amount| Command::SendPriceOffer { amount }),
        Just(Command::AcceptPrice),
        Just(Command::RejectPrice),
        arb_amount().prop_map(|amount| Command::NegotiatePrice { amount }),
        Just(Command::AgreeNegotiation),
        Just(Command::RejectNegotiation),
        arb_amount().prop_map(|amount| Command::SendNegotiatedPrice { amount }),
        Just(Command::AcceptNegotiatedPrice),
        Just(Command::RejectNegotiatedPrice),
        arb_amount().prop_map(|amount| Command::ContinueNegotiate { amount }),
        "[a-z0-9]{6}".prop_map(|id| Command::PaymentConfirmed {
            gateway_payment_id: id
        }),
        Just(Command::StartWork),
        Just(Command::SubmitWork {
            attachments: vec!["https://cdn.example/reel.mp4".to_string()]
        }),
        Just(Command::ApproveWork),
        "[a-z ]{0,12}".prop_map(|note| Command::RequestRevision { note }),
        Just(Command::OpenChat),
        "[a-z]{1,12}".prop_map(|body| Command::SendText { body }),
        Just(Command::CloseChat),
        Just(Command::Timeout),
    ]
}

fn new_conversation() -> Conversation {
    match Conversation::new(
        UserId::new(),
        UserId::new(),
        Binding::Campaign(uuid::Uuid::new_v4()),
        None,
        FlowState::InitialOffer,
    ) {
        Ok(conv) => conv,
        Err(e) => panic!("valid conversation: {e}"),
    }
}

fn actor_for(conv: &Conversation, who: Who) -> Actor {
    match who {
        Who::Brand => Actor::Participant(conv.brand_owner_id),
        Who::Influencer => Actor::Participant(conv.influencer_id),
        Who::Outsider => Actor::Participant(UserId::new()),
        Who::System => Actor::System,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn random_sequences_keep_state_invariants(
        steps in proptest::collection::vec((arb_who(), arb_command()), 1..60)
    ) {
        let policy = FlowPolicy::default();
        let mut conv = new_conversation();

        for (who, command) in steps {
            let actor = actor_for(&conv, who);
            let Ok(planned) = plan(&conv, actor, &command, &policy) else {
                continue;
            };

            prop_assert!(table::is_edge(conv.flow_state, command.kind(), planned.to()));
            prop_assert_eq!(planned.messages.len(), 1);

            let next = planned.patch.apply(&conv, Utc::now());
            prop_assert_eq!(next.awaiting_role, next.flow_state.awaiting_role());
            prop_assert_eq!(next.chat_status, next.flow_state.chat_status());
            prop_assert!(next.negotiation_round >= conv.negotiation_round);
            prop_assert!(next.negotiation_round <= policy.max_rounds);
            prop_assert_eq!(next.version, conv.version + 1);
            if conv.final_agreed_amount.is_some() {
                prop_assert_eq!(next.final_agreed_amount, conv.final_agreed_amount);
            }
            if next.flow_state == FlowState::PaymentPending {
                prop_assert!(next.final_agreed_amount.is_some());
            }
            for message in &planned.messages {
                prop_assert!(next.is_participant(message.receiver_id));
            }
            conv = next;
        }
    }

    #[test]
    fn participants_never_pass_a_wrong_turn(
        state_idx in 0usize..FlowState::ALL.len(),
        command in arb_command(),
    ) {
        let mut conv = new_conversation();
        let state = FlowState::ALL.get(state_idx).copied().unwrap_or(FlowState::InitialOffer);
        conv.flow_state = state;
        conv.awaiting_role = state.awaiting_role();
        conv.chat_status = state.chat_status();
        conv.pending_offer = Some(10_000);
        conv.final_agreed_amount = Some(10_000);
        conv.escrow_hold_id = Some(LedgerEntryId::new());

        if let Some(role) = state.awaiting_role().role() {
            let other = match conv.participant(role).and_then(|u| conv.counterpart(u)) {
                Some(user) => user,
                None => panic!("two participants"),
            };
            let result = plan(&conv, Actor::Participant(other), &command, &FlowPolicy::default());
            prop_assert!(result.is_err());
        }
    }

    #[test]
    fn ledger_conserves_money(
        deposit in 1i64..10_000_000,
        hold_fraction in 1i64..=100,
        bps in 0u32..=10_000,
        release in any::<bool>(),
    ) {
        let brand = UserId::new();
        let influencer = UserId::new();
        let mut book = LedgerBook::new();
        let now = Utc::now();
        prop_assert!(book.deposit(brand, deposit, LedgerRefs::default(), now).is_ok());

        let amount = (deposit * hold_fraction / 100).max(1);
        let hold_id = LedgerEntryId::new();
        let fund = LedgerEffect::FundAndFreeze {
            hold_id,
            payer: brand,
            amount,
            refs: LedgerRefs::default(),
        };
        prop_assert!(book.apply_effect(&fund, now).is_ok());

        let settle = if release {
            let rate = match crate::domain::money::CommissionRate::from_bps(bps) {
                Ok(rate) => rate,
                Err(e) => panic!("bps in range: {e}"),
            };
            LedgerEffect::Release { hold_id, payee: influencer, rate }
        } else {
            LedgerEffect::Refund { hold_id }
        };
        prop_assert!(book.apply_effect(&settle, now).is_ok());
        prop_assert!(book.apply_effect(&settle, now).is_ok());

        let total: Minor = book.wallets().map(Wallet::total).sum();
        prop_assert_eq!(total, deposit + amount);
        prop_assert_eq!(total, book.completed_deposits());
        prop_assert!(book.outstanding_holds().is_empty());
        for wallet in book.wallets() {
            prop_assert!(wallet.available >= 0 && wallet.frozen >= 0 && wallet.withdrawn >= 0);
            let replayed = Wallet::replay(wallet.user_id, book.entries());
            prop_assert_eq!(replayed.ok(), Some(*wallet));
        }
    }
}
