//! Idle negotiation sweeper.
//!
//! A background task wakes on a fixed interval, finds conversations that
//! sat idle in a timeout-eligible state for longer than the negotiation
//! timeout, and issues `timeout` through the normal chat path. A
//! conversation that moved meanwhile conflicts and is picked up again on a
//! later tick if it is still idle.
//!
//! The same pass resumes conversations resting in a state the system
//! normally leaves at once (see [`FlowState::awaits_system`]), which
//! happens when a follow-up commit was lost.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use super::chat_service::ChatService;
use crate::domain::conversation::FlowState;
use crate::error::GatewayError;
use crate::store::ChatStore;

/// How long a conversation may rest in a system-owned state before the
/// sweeper takes over its follow-up.
const STALL_GRACE: chrono::Duration = chrono::Duration::minutes(1);

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Conversations closed.
    pub timed_out: usize,
    /// Interrupted follow-ups completed.
    pub resumed: usize,
    /// Conversations that changed or failed and were left alone.
    pub skipped: usize,
}

/// Times out idle negotiations.
#[derive(Debug, Clone)]
pub struct IdleSweeper {
    chat: ChatService,
    store: Arc<dyn ChatStore>,
    idle_after: chrono::Duration,
    interval: Duration,
}

impl IdleSweeper {
    /// Creates a sweeper closing conversations idle for `idle_after`,
    /// checking every `interval`.
    #[must_use]
    pub fn new(chat: ChatService, idle_after: chrono::Duration, interval: Duration) -> Self {
        Self {
            store: Arc::clone(chat.store()),
            chat,
            idle_after,
            interval,
        }
    }

    /// Runs the sweeper until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep_once(Utc::now()).await {
                    Ok(report) if report != SweepReport::default() => {
                        tracing::info!(
                            timed_out = report.timed_out,
                            resumed = report.resumed,
                            skipped = report.skipped,
                            "idle sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "idle sweep failed"),
                }
            }
        })
    }

    /// One pass at `now`: timeouts first, then stalled follow-ups.
    ///
    /// # Errors
    ///
    /// Store failures while listing idle conversations. Per-conversation
    /// failures are counted as skipped.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, GatewayError> {
        let eligible: Vec<FlowState> = FlowState::ALL
            .into_iter()
            .filter(FlowState::is_timeout_eligible)
            .collect();
        let idle = self.store.find_idle(now - self.idle_after, &eligible).await?;

        let mut report = SweepReport::default();
        for conversation in idle {
            let conversation_id = conversation.id;
            let state = conversation.flow_state;
            match self.chat.expire(conversation).await {
                Ok(_) => {
                    tracing::info!(%conversation_id, from = %state, "conversation timed out");
                    report.timed_out += 1;
                }
                Err(GatewayError::Conflict { .. }) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(%conversation_id, error = %e, "timeout failed");
                    report.skipped += 1;
                }
            }
        }

        let system_owned: Vec<FlowState> = FlowState::ALL
            .into_iter()
            .filter(FlowState::awaits_system)
            .collect();
        let stalled = self.store.find_idle(now - STALL_GRACE, &system_owned).await?;
        for conversation in stalled {
            let conversation_id = conversation.id;
            let state = conversation.flow_state;
            match self.chat.resume(conversation).await {
                Ok(_) => {
                    tracing::info!(%conversation_id, from = %state, "stalled follow-up resumed");
                    report.resumed += 1;
                }
                Err(GatewayError::Conflict { .. }) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(%conversation_id, error = %e, "resume failed");
                    report.skipped += 1;
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::command::{Actor, Command};
    use crate::domain::conversation::Binding;
    use crate::domain::money::CommissionRate;
    use crate::domain::payment::{OrderPurpose, OrderSettlement, OrderStatus, PaymentOrder};
    use crate::domain::user::{Role, User};
    use crate::domain::EventBus;
    use crate::engine::{FlowPolicy, plan};
    use crate::store::TransitionCommit;
    use crate::external::LogNotifier;
    use crate::service::fanout::FanoutDispatcher;
    use crate::service::settings_service::SettingsHolder;
    use crate::store::MemoryStore;

    fn chat(store: Arc<dyn ChatStore>) -> ChatService {
        let bus = EventBus::new(64);
        let (outbox, _handle) = FanoutDispatcher::spawn(Arc::clone(&store), bus.clone());
        ChatService::new(
            Arc::clone(&store),
            outbox,
            bus,
            SettingsHolder::new(store, CommissionRate::DEFAULT),
            Arc::new(LogNotifier),
            FlowPolicy::default(),
        )
    }

    #[tokio::test]
    async fn idle_negotiation_is_closed_and_direct_chat_is_not() {
        let store: Arc<dyn ChatStore> = Arc::new(MemoryStore::new());
        let chat = chat(Arc::clone(&store));
        let Ok(brand) = chat.register_user(User::new(Role::BrandOwner, "Acme")).await else {
            panic!("brand");
        };
        let Ok(influencer) = chat.register_user(User::new(Role::Influencer, "Ivy")).await else {
            panic!("influencer");
        };
        let Ok(request) = chat
            .apply(influencer.id, brand.id, Binding::Bid(uuid::Uuid::new_v4()))
            .await
        else {
            panic!("applied");
        };
        let Ok(opened) = chat.connect(request.id, brand.id).await else {
            panic!("connected");
        };
        let Ok(direct) = chat.open_direct(brand.id, influencer.id).await else {
            panic!("direct");
        };

        let sweeper = IdleSweeper::new(chat, chrono::Duration::hours(72), Duration::from_secs(60));
        let Ok(early) = sweeper.sweep_once(Utc::now()).await else {
            panic!("sweep");
        };
        assert_eq!(early, SweepReport::default());

        let later = Utc::now() + chrono::Duration::hours(73);
        let Ok(report) = sweeper.sweep_once(later).await else {
            panic!("sweep");
        };
        assert_eq!(report.timed_out, 1);

        let Ok(closed) = store.load(opened.record.conversation.id).await else {
            panic!("load");
        };
        assert_eq!(closed.conversation.flow_state, FlowState::Closed);
        let Ok(open) = store.load(direct.record.conversation.id).await else {
            panic!("load");
        };
        assert_eq!(open.conversation.flow_state, FlowState::RealTime);
    }

    #[tokio::test]
    async fn stale_snapshot_is_skipped() {
        let store: Arc<dyn ChatStore> = Arc::new(MemoryStore::new());
        let chat = chat(Arc::clone(&store));
        let Ok(brand) = chat.register_user(User::new(Role::BrandOwner, "Acme")).await else {
            panic!("brand");
        };
        let Ok(influencer) = chat.register_user(User::new(Role::Influencer, "Ivy")).await else {
            panic!("influencer");
        };
        let Ok(request) = chat
            .apply(influencer.id, brand.id, Binding::Bid(uuid::Uuid::new_v4()))
            .await
        else {
            panic!("applied");
        };
        let Ok(opened) = chat.connect(request.id, brand.id).await else {
            panic!("connected");
        };
        let id = opened.record.conversation.id;
        let Ok(snapshot) = store.load(id).await else {
            panic!("load");
        };
        let offer = chat
            .execute(id, Actor::Participant(brand.id), Command::SendPriceOffer { amount: 1_000 })
            .await;
        assert!(offer.is_ok());

        assert!(matches!(
            chat.expire(snapshot.conversation).await,
            Err(GatewayError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn interrupted_approval_is_resumed_into_real_time() {
        let store: Arc<dyn ChatStore> = Arc::new(MemoryStore::new());
        let chat = chat(Arc::clone(&store));
        let Ok(brand) = chat.register_user(User::new(Role::BrandOwner, "Acme")).await else {
            panic!("brand");
        };
        let Ok(influencer) = chat.register_user(User::new(Role::Influencer, "Ivy")).await else {
            panic!("influencer");
        };
        let Ok(request) = chat
            .apply(influencer.id, brand.id, Binding::Bid(uuid::Uuid::new_v4()))
            .await
        else {
            panic!("applied");
        };
        let Ok(opened) = chat.connect(request.id, brand.id).await else {
            panic!("connected");
        };
        let id = opened.record.conversation.id;
        for (user, command) in [
            (brand.id, Command::SendPriceOffer { amount: 300_000 }),
            (influencer.id, Command::AcceptPrice),
        ] {
            assert!(chat.execute(id, Actor::Participant(user), command).await.is_ok());
        }
        let order = PaymentOrder::new(
            "order_stall".to_string(),
            brand.id,
            OrderPurpose::Escrow { conversation_id: id },
            300_000,
            "INR".to_string(),
        );
        let Ok(()) = store.insert_order(&order).await else {
            panic!("order");
        };
        let settlement = OrderSettlement {
            order_id: order.id,
            status: OrderStatus::Paid,
            gateway_payment_id: "pay_stall".to_string(),
        };
        assert!(chat.confirm_payment(id, settlement).await.is_ok());
        let submit = Command::SubmitWork {
            attachments: vec!["https://cdn.example/reel.mp4".to_string()],
        };
        assert!(chat.execute(id, Actor::Participant(influencer.id), submit).await.is_ok());

        // Commit the approval alone, as if the process died before open_chat.
        let Ok(record) = store.load(id).await else {
            panic!("load");
        };
        let Ok(approval) = plan(
            &record.conversation,
            Actor::Participant(brand.id),
            &Command::ApproveWork,
            &FlowPolicy::default(),
        ) else {
            panic!("approval is legal");
        };
        let commit = TransitionCommit {
            conversation_id: id,
            plan: approval,
            settlement: None,
        };
        let Ok(stalled) = store.apply_transition(commit).await else {
            panic!("approval commits");
        };
        assert_eq!(stalled.conversation.flow_state, FlowState::WorkApproved);

        let sweeper = IdleSweeper::new(chat.clone(), chrono::Duration::hours(72), Duration::from_secs(60));
        let Ok(early) = sweeper.sweep_once(Utc::now()).await else {
            panic!("sweep");
        };
        assert_eq!(early.resumed, 0);

        let Ok(report) = sweeper.sweep_once(Utc::now() + chrono::Duration::minutes(5)).await else {
            panic!("sweep");
        };
        assert_eq!(report.resumed, 1);
        assert_eq!(report.timed_out, 0);
        let Ok(resumed) = store.load(id).await else {
            panic!("load");
        };
        assert_eq!(resumed.conversation.flow_state, FlowState::RealTime);

        assert!(matches!(
            chat.resume(resumed.conversation).await,
            Err(GatewayError::IllegalTransition(_))
        ));
    }
}
