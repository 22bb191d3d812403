//! Out-of-band user notifications (WhatsApp templates upstream).
//!
//! Delivery is fire-and-forget: the service spawns `send` after a commit
//! and only logs failures.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::money::{Minor, format_minor};
use crate::domain::{ConversationId, UserId};
use crate::error::GatewayError;

/// Milestones worth telling a user about outside the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum Notification {
    /// A brand connected to the influencer's request.
    Connected {
        /// New conversation.
        conversation_id: ConversationId,
    },
    /// A price offer arrived.
    OfferReceived {
        /// Conversation.
        conversation_id: ConversationId,
        /// Offered amount.
        amount: Minor,
    },
    /// Both sides agreed on a price; the brand owes payment.
    PaymentDue {
        /// Conversation.
        conversation_id: ConversationId,
        /// Agreed amount.
        amount: Minor,
    },
    /// Escrow is funded; the influencer can start.
    PaymentReceived {
        /// Conversation.
        conversation_id: ConversationId,
    },
    /// Work is waiting for review.
    WorkSubmitted {
        /// Conversation.
        conversation_id: ConversationId,
    },
    /// Work approved and funds released.
    WorkApproved {
        /// Conversation.
        conversation_id: ConversationId,
    },
    /// The conversation closed without a deal.
    Closed {
        /// Conversation.
        conversation_id: ConversationId,
    },
}

impl Notification {
    /// Short human-readable text.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Connected { .. } => "A brand wants to work with you".to_string(),
            Self::OfferReceived { amount, .. } => {
                format!("New offer: {}", format_minor(*amount))
            }
            Self::PaymentDue { amount, .. } => {
                format!("Price agreed at {}; payment is due", format_minor(*amount))
            }
            Self::PaymentReceived { .. } => "Payment received; you can start work".to_string(),
            Self::WorkSubmitted { .. } => "Work submitted for your review".to_string(),
            Self::WorkApproved { .. } => "Work approved; funds released".to_string(),
            Self::Closed { .. } => "Conversation closed".to_string(),
        }
    }
}

/// Notification delivery.
#[async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Delivers `notification` to `to`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ExternalUnavailable`] when delivery fails.
    async fn send(&self, to: UserId, notification: Notification) -> Result<(), GatewayError>;
}

/// Writes notifications to the trace log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: UserId, notification: Notification) -> Result<(), GatewayError> {
        tracing::info!(user_id = %to, text = %notification.text(), "notification");
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<(UserId, Notification)>>,
}

impl MemoryNotifier {
    /// Empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<(UserId, Notification)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, to: UserId, notification: Notification) -> Result<(), GatewayError> {
        self.sent
            .lock()
            .map_err(|_| GatewayError::Internal("notifier lock poisoned".to_string()))?
            .push((to, notification));
        Ok(())
    }
}
