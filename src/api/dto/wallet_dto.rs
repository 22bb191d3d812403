//! Wallet DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::ledger::{Direction, EntryKind, EntryStatus, LedgerEntry, Wallet};
use crate::domain::money::Minor;
use crate::service::Withdrawal;

/// Balances in minor units.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WalletResponse {
    /// Spendable.
    pub available: Minor,
    /// Held in escrow.
    pub frozen: Minor,
    /// Paid out.
    pub withdrawn: Minor,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            available: wallet.available,
            frozen: wallet.frozen,
            withdrawn: wallet.withdrawn,
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LedgerEntryDto {
    /// Entry id.
    pub id: Uuid,
    /// Credit or debit.
    pub direction: Direction,
    /// Business meaning.
    pub kind: EntryKind,
    /// Amount in minor units.
    pub amount_minor: Minor,
    /// Lifecycle.
    pub status: EntryStatus,
    /// Conversation the entry belongs to.
    pub conversation_id: Option<Uuid>,
    /// Gateway payment id.
    pub gateway_payment_id: Option<String>,
    /// Escrow hold the entry settles.
    pub hold_id: Option<Uuid>,
    /// Write time.
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for LedgerEntryDto {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id.into(),
            direction: entry.direction,
            kind: entry.kind,
            amount_minor: entry.amount_minor,
            status: entry.status,
            conversation_id: entry.refs.conversation_id.map(Into::into),
            gateway_payment_id: entry.refs.gateway_payment_id,
            hold_id: entry.refs.hold_id.map(Into::into),
            created_at: entry.created_at,
        }
    }
}

/// Ledger history, newest first.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LedgerResponse {
    /// Entries.
    pub data: Vec<LedgerEntryDto>,
}

/// Request body for deposits and withdrawals.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AmountRequest {
    /// Amount in minor units.
    pub amount: Minor,
}

/// Result of `POST /wallet/withdrawals`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WithdrawalResponse {
    /// Balances after the debit.
    pub wallet: WalletResponse,
    /// The withdrawal ledger entry.
    pub entry: LedgerEntryDto,
    /// Gateway payout id; absent while the payout is pending.
    pub payout_id: Option<String>,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(withdrawal: Withdrawal) -> Self {
        Self {
            wallet: withdrawal.wallet.into(),
            entry: withdrawal.entry.into(),
            payout_id: withdrawal.payout_id,
        }
    }
}
