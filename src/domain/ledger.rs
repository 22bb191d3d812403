//! Escrow ledger.
//!
//! Every balance change is an append-only [`LedgerEntry`] with a fixed
//! [`WalletDelta`]; a [`Wallet`] is the running sum of the deltas of its
//! user's completed entries. [`LedgerBook`] applies the escrow operations
//! over a set of wallets and entries. Each operation checks all of its
//! post-conditions before it writes anything, so a failed operation
//! leaves the book untouched.
//!
//! Sign convention, per entry user:
//!
//! | kind / direction | delta |
//! |---|---|
//! | deposit / credit | available + a |
//! | escrow_hold / debit | available − a, frozen + a |
//! | escrow_release / debit | frozen − a |
//! | escrow_release / credit | available + a |
//! | fee / credit | available + a |
//! | refund / credit | frozen − a, available + a |
//! | withdrawal / debit | available − a, withdrawn + a |

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::money::{CommissionRate, Minor};
use super::{ConversationId, LedgerEntryId, RequestId, UserId};
use crate::error::GatewayError;

macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            /// Returns the wire name.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = GatewayError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(GatewayError::Internal(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

/// Entry direction relative to the entry's user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Money towards the user.
    Credit,
    /// Money away from the user's available balance.
    Debit,
}

wire_enum!(Direction { Credit => "credit", Debit => "debit" });

/// Business meaning of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Funds entering the platform.
    Deposit,
    /// Funds frozen for a conversation.
    EscrowHold,
    /// Settlement of a hold to the payee.
    EscrowRelease,
    /// Settlement of a hold back to the payer.
    Refund,
    /// Funds leaving the platform.
    Withdrawal,
    /// Platform commission.
    Fee,
}

wire_enum!(EntryKind {
    Deposit => "deposit",
    EscrowHold => "escrow_hold",
    EscrowRelease => "escrow_release",
    Refund => "refund",
    Withdrawal => "withdrawal",
    Fee => "fee",
});

/// Entry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Recorded, not yet effective.
    Pending,
    /// Effective on the wallet.
    Completed,
    /// Never effective.
    Failed,
}

wire_enum!(EntryStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
});

/// Cross references carried by an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRefs {
    /// Conversation the money belongs to.
    pub conversation_id: Option<ConversationId>,
    /// Request the conversation was opened from.
    pub request_id: Option<RequestId>,
    /// Gateway payment that funded a deposit or hold.
    pub gateway_payment_id: Option<String>,
    /// Hold settled by a release, fee or refund entry.
    pub hold_id: Option<LedgerEntryId>,
}

impl LedgerRefs {
    /// Refs pointing at a conversation.
    #[must_use]
    pub fn conversation(conversation_id: ConversationId, request_id: Option<RequestId>) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            request_id,
            ..Self::default()
        }
    }

    fn settling(hold: &LedgerEntry) -> Self {
        Self {
            hold_id: Some(hold.id),
            ..hold.refs.clone()
        }
    }
}

/// One append-only ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry id. For holds, this is the hold id.
    pub id: LedgerEntryId,
    /// Wallet owner.
    pub user_id: UserId,
    /// Direction.
    pub direction: Direction,
    /// Kind.
    pub kind: EntryKind,
    /// Strictly positive amount.
    pub amount_minor: Minor,
    /// Lifecycle.
    pub status: EntryStatus,
    /// Cross references.
    pub refs: LedgerRefs,
    /// Write time.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn completed(
        id: LedgerEntryId,
        user_id: UserId,
        direction: Direction,
        kind: EntryKind,
        amount_minor: Minor,
        refs: LedgerRefs,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            direction,
            kind,
            amount_minor,
            status: EntryStatus::Completed,
            refs,
            created_at,
        }
    }

    /// Wallet delta of this entry, `None` for a kind/direction pair that
    /// has no meaning.
    #[must_use]
    pub const fn wallet_delta(&self) -> Option<WalletDelta> {
        let a = self.amount_minor;
        let delta = match (self.kind, self.direction) {
            (EntryKind::Deposit, Direction::Credit)
            | (EntryKind::EscrowRelease, Direction::Credit)
            | (EntryKind::Fee, Direction::Credit) => WalletDelta::new(a, 0, 0),
            (EntryKind::EscrowHold, Direction::Debit) => WalletDelta::new(-a, a, 0),
            (EntryKind::EscrowRelease, Direction::Debit) => WalletDelta::new(0, -a, 0),
            (EntryKind::Refund, Direction::Credit) => WalletDelta::new(a, -a, 0),
            (EntryKind::Withdrawal, Direction::Debit) => WalletDelta::new(-a, 0, a),
            _ => return None,
        };
        Some(delta)
    }
}

/// Signed change to the three wallet balances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalletDelta {
    /// Change to `available`.
    pub available: Minor,
    /// Change to `frozen`.
    pub frozen: Minor,
    /// Change to `withdrawn`.
    pub withdrawn: Minor,
}

impl WalletDelta {
    const fn new(available: Minor, frozen: Minor, withdrawn: Minor) -> Self {
        Self {
            available,
            frozen,
            withdrawn,
        }
    }
}

/// Per-user balances. All three are non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Owner.
    pub user_id: UserId,
    /// Spendable or withdrawable.
    pub available: Minor,
    /// Held in escrow.
    pub frozen: Minor,
    /// Paid out.
    pub withdrawn: Minor,
}

impl Wallet {
    /// An empty wallet.
    #[must_use]
    pub const fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            available: 0,
            frozen: 0,
            withdrawn: 0,
        }
    }

    /// `available + frozen + withdrawn`.
    #[must_use]
    pub const fn total(&self) -> Minor {
        self.available + self.frozen + self.withdrawn
    }

    /// Returns the wallet after `delta`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvariantViolation`] if any balance would
    /// overflow or become negative.
    pub fn apply(&self, delta: WalletDelta) -> Result<Self, GatewayError> {
        let add = |balance: Minor, change: Minor, name: &str| {
            balance
                .checked_add(change)
                .filter(|v| *v >= 0)
                .ok_or_else(|| {
                    GatewayError::InvariantViolation(format!(
                        "wallet {} {name} would become {balance} + {change}",
                        self.user_id
                    ))
                })
        };
        Ok(Self {
            user_id: self.user_id,
            available: add(self.available, delta.available, "available")?,
            frozen: add(self.frozen, delta.frozen, "frozen")?,
            withdrawn: add(self.withdrawn, delta.withdrawn, "withdrawn")?,
        })
    }

    /// Rebuilds a wallet from its user's completed entries.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvariantViolation`] if the entries are
    /// inconsistent.
    pub fn replay<'a>(
        user_id: UserId,
        entries: impl IntoIterator<Item = &'a LedgerEntry>,
    ) -> Result<Self, GatewayError> {
        entries
            .into_iter()
            .filter(|e| e.user_id == user_id && e.status == EntryStatus::Completed)
            .try_fold(Self::empty(user_id), |wallet, entry| {
                let delta = entry.wallet_delta().ok_or_else(|| invalid_pair(entry))?;
                wallet.apply(delta)
            })
    }
}

fn invalid_pair(entry: &LedgerEntry) -> GatewayError {
    GatewayError::InvariantViolation(format!(
        "entry {} has no wallet delta for {}/{}",
        entry.id, entry.kind, entry.direction
    ))
}

/// Ledger change planned by the flow engine for a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEffect {
    /// No money moves.
    None,
    /// Credit a captured gateway payment to the payer and freeze it under
    /// a pre-generated hold id.
    FundAndFreeze {
        /// Id the hold entry will carry.
        hold_id: LedgerEntryId,
        /// Brand owner.
        payer: UserId,
        /// Agreed amount, as captured by the gateway.
        amount: Minor,
        /// Conversation refs with the gateway payment id.
        refs: LedgerRefs,
    },
    /// Settle a hold to the payee minus commission.
    Release {
        /// Hold to settle.
        hold_id: LedgerEntryId,
        /// Influencer.
        payee: UserId,
        /// Commission resolved when the release was planned.
        rate: CommissionRate,
    },
    /// Return a hold to its payer.
    Refund {
        /// Hold to settle.
        hold_id: LedgerEntryId,
    },
}

impl LedgerEffect {
    /// Hold the effect operates on.
    #[must_use]
    pub const fn hold_id(&self) -> Option<LedgerEntryId> {
        match self {
            Self::None => None,
            Self::FundAndFreeze { hold_id, .. }
            | Self::Release { hold_id, .. }
            | Self::Refund { hold_id } => Some(*hold_id),
        }
    }

    /// Users whose wallets the effect may touch, without the hold payer
    /// for settlements (the store resolves it from the hold entry).
    #[must_use]
    pub fn known_users(&self) -> Vec<UserId> {
        match self {
            Self::None | Self::Refund { .. } => Vec::new(),
            Self::FundAndFreeze { payer, .. } => vec![*payer],
            Self::Release { payee, .. } => vec![*payee, UserId::PLATFORM],
        }
    }
}

/// A set of wallets and entries the escrow operations run against.
///
/// [`MemoryStore`](crate::store::MemoryStore) keeps one book for
/// everything; [`PostgresStore`](crate::store::PostgresStore) loads a
/// working book with just the locked wallets and the entries of the
/// hold in play, then persists [`LedgerBook::changes`].
#[derive(Debug, Clone, Default)]
pub struct LedgerBook {
    wallets: HashMap<UserId, Wallet>,
    entries: Vec<LedgerEntry>,
    base_len: usize,
    touched: BTreeSet<UserId>,
}

/// Wallets and entries written by a book since it was loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerChanges {
    /// Updated wallets, ascending by user id.
    pub wallets: Vec<Wallet>,
    /// Appended entries, in write order.
    pub entries: Vec<LedgerEntry>,
}

impl LedgerBook {
    /// An empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A working book over previously stored rows.
    #[must_use]
    pub fn from_parts(wallets: Vec<Wallet>, entries: Vec<LedgerEntry>) -> Self {
        let base_len = entries.len();
        Self {
            wallets: wallets.into_iter().map(|w| (w.user_id, w)).collect(),
            entries,
            base_len,
            touched: BTreeSet::new(),
        }
    }

    /// Current wallet of `user` (empty when never touched).
    #[must_use]
    pub fn wallet(&self, user: UserId) -> Wallet {
        self.wallets
            .get(&user)
            .copied()
            .unwrap_or_else(|| Wallet::empty(user))
    }

    /// All wallets, in no particular order.
    pub fn wallets(&self) -> impl Iterator<Item = &Wallet> {
        self.wallets.values()
    }

    /// All entries, in write order.
    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Entries of one user, newest first.
    #[must_use]
    pub fn entries_for(&self, user: UserId) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user)
            .cloned()
            .collect()
    }

    /// The `escrow_hold` entry with this id.
    #[must_use]
    pub fn hold(&self, hold_id: LedgerEntryId) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|e| e.id == hold_id && e.kind == EntryKind::EscrowHold)
    }

    /// Release, fee and refund entries settling `hold_id`.
    #[must_use]
    pub fn settlements(&self, hold_id: LedgerEntryId) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| e.refs.hold_id == Some(hold_id))
            .cloned()
            .collect()
    }

    /// Holds with no settlement yet.
    #[must_use]
    pub fn outstanding_holds(&self) -> Vec<&LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::EscrowHold && e.status == EntryStatus::Completed)
            .filter(|hold| !self.entries.iter().any(|e| e.refs.hold_id == Some(hold.id)))
            .collect()
    }

    /// Sum of completed deposits.
    #[must_use]
    pub fn completed_deposits(&self) -> Minor {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::Deposit && e.status == EntryStatus::Completed)
            .map(|e| e.amount_minor)
            .sum()
    }

    /// Wallets and entries written since the book was loaded.
    #[must_use]
    pub fn changes(&self) -> LedgerChanges {
        LedgerChanges {
            wallets: self.touched.iter().map(|u| self.wallet(*u)).collect(),
            entries: self.entries.get(self.base_len..).unwrap_or_default().to_vec(),
        }
    }

    /// Credits a deposit to `user`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidAmount`] for a non-positive amount.
    pub fn deposit(
        &mut self,
        user: UserId,
        amount: Minor,
        refs: LedgerRefs,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, GatewayError> {
        positive(amount)?;
        let entry = LedgerEntry::completed(
            LedgerEntryId::new(),
            user,
            Direction::Credit,
            EntryKind::Deposit,
            amount,
            refs,
            now,
        );
        self.commit(vec![entry.clone()])?;
        Ok(entry)
    }

    /// Moves `amount` of `user`'s available balance into a hold with id
    /// `hold_id`. Freezing an existing hold returns it unchanged.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InsufficientFunds`] if `available < amount`.
    pub fn freeze(
        &mut self,
        hold_id: LedgerEntryId,
        user: UserId,
        amount: Minor,
        refs: LedgerRefs,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, GatewayError> {
        if let Some(existing) = self.hold(hold_id) {
            return Ok(existing.clone());
        }
        positive(amount)?;
        let wallet = self.wallet(user);
        if wallet.available < amount {
            return Err(GatewayError::InsufficientFunds {
                available: wallet.available,
                required: amount,
            });
        }
        let hold = escrow_hold(hold_id, user, amount, refs, now);
        self.commit(vec![hold.clone()])?;
        Ok(hold)
    }

    /// Credits a captured payment to `payer` and freezes it under
    /// `hold_id` in one commit, so the payer's prior balance is never
    /// touched. Re-funding an existing hold returns the hold unchanged.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidAmount`] for a non-positive amount.
    pub fn fund_and_freeze(
        &mut self,
        hold_id: LedgerEntryId,
        payer: UserId,
        amount: Minor,
        refs: &LedgerRefs,
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, GatewayError> {
        if let Some(existing) = self.hold(hold_id) {
            return Ok(vec![existing.clone()]);
        }
        positive(amount)?;
        let entries = vec![
            LedgerEntry::completed(
                LedgerEntryId::new(),
                payer,
                Direction::Credit,
                EntryKind::Deposit,
                amount,
                refs.clone(),
                now,
            ),
            escrow_hold(hold_id, payer, amount, refs.clone(), now),
        ];
        self.commit(entries.clone())?;
        Ok(entries)
    }

    /// Settles a hold to `payee`, minus the platform commission.
    ///
    /// Idempotent: if the hold is already released, the prior entries are
    /// returned and nothing changes.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvariantViolation`] if the hold is missing or was
    /// refunded.
    pub fn release(
        &mut self,
        hold_id: LedgerEntryId,
        payee: UserId,
        rate: CommissionRate,
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, GatewayError> {
        let hold = self.require_hold(hold_id)?;
        let prior = self.settlements(hold_id);
        if prior.iter().any(|e| e.kind == EntryKind::Refund) {
            return Err(GatewayError::InvariantViolation(format!(
                "hold {hold_id} was refunded and cannot be released"
            )));
        }
        if !prior.is_empty() {
            return Ok(prior);
        }

        let (payout, fee) = rate.split(hold.amount_minor);
        let refs = LedgerRefs::settling(&hold);
        let mut entries = vec![LedgerEntry::completed(
            LedgerEntryId::new(),
            hold.user_id,
            Direction::Debit,
            EntryKind::EscrowRelease,
            hold.amount_minor,
            refs.clone(),
            now,
        )];
        if payout > 0 {
            entries.push(LedgerEntry::completed(
                LedgerEntryId::new(),
                payee,
                Direction::Credit,
                EntryKind::EscrowRelease,
                payout,
                refs.clone(),
                now,
            ));
        }
        if fee > 0 {
            entries.push(LedgerEntry::completed(
                LedgerEntryId::new(),
                UserId::PLATFORM,
                Direction::Credit,
                EntryKind::Fee,
                fee,
                refs,
                now,
            ));
        }
        self.commit(entries.clone())?;
        Ok(entries)
    }

    /// Returns a hold to its payer. Idempotent like [`Self::release`].
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvariantViolation`] if the hold is missing or was
    /// released.
    pub fn refund(
        &mut self,
        hold_id: LedgerEntryId,
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, GatewayError> {
        let hold = self.require_hold(hold_id)?;
        let prior = self.settlements(hold_id);
        if prior.iter().any(|e| e.kind != EntryKind::Refund) {
            return Err(GatewayError::InvariantViolation(format!(
                "hold {hold_id} was released and cannot be refunded"
            )));
        }
        if !prior.is_empty() {
            return Ok(prior);
        }
        let entry = LedgerEntry::completed(
            LedgerEntryId::new(),
            hold.user_id,
            Direction::Credit,
            EntryKind::Refund,
            hold.amount_minor,
            LedgerRefs::settling(&hold),
            now,
        );
        self.commit(vec![entry.clone()])?;
        Ok(vec![entry])
    }

    /// Moves available funds to `withdrawn`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InsufficientFunds`] if `available < amount`.
    pub fn withdraw(
        &mut self,
        user: UserId,
        amount: Minor,
        refs: LedgerRefs,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, GatewayError> {
        positive(amount)?;
        let wallet = self.wallet(user);
        if wallet.available < amount {
            return Err(GatewayError::InsufficientFunds {
                available: wallet.available,
                required: amount,
            });
        }
        let entry = LedgerEntry::completed(
            LedgerEntryId::new(),
            user,
            Direction::Debit,
            EntryKind::Withdrawal,
            amount,
            refs,
            now,
        );
        self.commit(vec![entry.clone()])?;
        Ok(entry)
    }

    /// Applies a planned effect, returning the entries it wrote (or the
    /// prior entries for an idempotent replay).
    ///
    /// # Errors
    ///
    /// Whatever the underlying operation returns.
    pub fn apply_effect(
        &mut self,
        effect: &LedgerEffect,
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, GatewayError> {
        match effect {
            LedgerEffect::None => Ok(Vec::new()),
            LedgerEffect::FundAndFreeze {
                hold_id,
                payer,
                amount,
                refs,
            } => self.fund_and_freeze(*hold_id, *payer, *amount, refs, now),
            LedgerEffect::Release {
                hold_id,
                payee,
                rate,
            } => self.release(*hold_id, *payee, *rate, now),
            LedgerEffect::Refund { hold_id } => self.refund(*hold_id, now),
        }
    }

    fn require_hold(&self, hold_id: LedgerEntryId) -> Result<LedgerEntry, GatewayError> {
        self.hold(hold_id).cloned().ok_or_else(|| {
            GatewayError::InvariantViolation(format!("escrow hold {hold_id} does not exist"))
        })
    }

    /// Applies every entry's delta to scratch wallets first, then writes
    /// wallets and entries together.
    fn commit(&mut self, entries: Vec<LedgerEntry>) -> Result<(), GatewayError> {
        let mut scratch: HashMap<UserId, Wallet> = HashMap::new();
        for entry in &entries {
            let delta = entry.wallet_delta().ok_or_else(|| invalid_pair(entry))?;
            let current = scratch
                .get(&entry.user_id)
                .copied()
                .unwrap_or_else(|| self.wallet(entry.user_id));
            scratch.insert(entry.user_id, current.apply(delta)?);
        }
        for (user, wallet) in scratch {
            self.touched.insert(user);
            self.wallets.insert(user, wallet);
        }
        self.entries.extend(entries);
        Ok(())
    }
}

fn escrow_hold(
    hold_id: LedgerEntryId,
    user: UserId,
    amount: Minor,
    refs: LedgerRefs,
    now: DateTime<Utc>,
) -> LedgerEntry {
    LedgerEntry::completed(
        hold_id,
        user,
        Direction::Debit,
        EntryKind::EscrowHold,
        amount,
        refs,
        now,
    )
}

fn positive(amount: Minor) -> Result<(), GatewayError> {
    if amount <= 0 {
        return Err(GatewayError::InvalidAmount(format!(
            "ledger amounts must be positive, got {amount}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn ten_percent() -> CommissionRate {
        let Ok(rate) = CommissionRate::from_bps(1_000) else {
            panic!("valid rate");
        };
        rate
    }

    fn funded(brand: UserId, amount: Minor) -> LedgerBook {
        let mut book = LedgerBook::new();
        let Ok(_) = book.deposit(brand, amount, LedgerRefs::default(), Utc::now()) else {
            panic!("deposit should succeed");
        };
        book
    }

    fn escrowed(book: &mut LedgerBook, brand: UserId, amount: Minor) -> LedgerEntryId {
        let hold_id = LedgerEntryId::new();
        let Ok(_) = book.fund_and_freeze(hold_id, brand, amount, &LedgerRefs::default(), Utc::now())
        else {
            panic!("funding should succeed");
        };
        hold_id
    }

    fn assert_conserved(book: &LedgerBook) {
        let total: Minor = book.wallets().map(Wallet::total).sum();
        assert_eq!(total, book.completed_deposits());
        for wallet in book.wallets() {
            let Ok(replayed) = Wallet::replay(wallet.user_id, book.entries()) else {
                panic!("replay should succeed");
            };
            assert_eq!(&replayed, wallet);
        }
    }

    #[test]
    fn escrow_then_release_pays_influencer_and_platform() {
        let brand = UserId::new();
        let influencer = UserId::new();
        let mut book = LedgerBook::new();
        let hold_id = escrowed(&mut book, brand, 300_000);

        let Some(hold) = book.hold(hold_id) else {
            panic!("hold should exist");
        };
        assert_eq!(hold.amount_minor, 300_000);
        assert_eq!(book.wallet(brand).available, 0);
        assert_eq!(book.wallet(brand).frozen, 300_000);

        let Ok(entries) = book.release(hold_id, influencer, ten_percent(), Utc::now()) else {
            panic!("release should succeed");
        };
        assert_eq!(entries.len(), 3);
        assert_eq!(book.wallet(brand).frozen, 0);
        assert_eq!(book.wallet(influencer).available, 270_000);
        assert_eq!(book.wallet(UserId::PLATFORM).available, 30_000);
        assert_conserved(&book);
    }

    #[test]
    fn funding_a_hold_leaves_the_prior_balance_alone() {
        let brand = UserId::new();
        let mut book = funded(brand, 50_000);
        let hold_id = LedgerEntryId::new();
        let refs = LedgerRefs {
            gateway_payment_id: Some("pay_1".to_string()),
            ..LedgerRefs::default()
        };

        let Ok(entries) = book.fund_and_freeze(hold_id, brand, 300_000, &refs, Utc::now()) else {
            panic!("a captured payment always funds its hold");
        };
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.refs.gateway_payment_id.as_deref() == Some("pay_1")));
        assert_eq!(book.wallet(brand).available, 50_000);
        assert_eq!(book.wallet(brand).frozen, 300_000);
        assert_eq!(book.completed_deposits(), 350_000);

        let Ok(again) = book.fund_and_freeze(hold_id, brand, 300_000, &refs, Utc::now()) else {
            panic!("re-funding is a no-op");
        };
        assert_eq!(again.len(), 1);
        assert_eq!(book.wallet(brand).frozen, 300_000);
        assert_conserved(&book);
    }

    #[test]
    fn freeze_needs_available_balance() {
        let brand = UserId::new();
        let mut book = funded(brand, 10_000);
        let hold_id = LedgerEntryId::new();

        let short = book.freeze(hold_id, brand, 20_000, LedgerRefs::default(), Utc::now());
        assert!(matches!(
            short,
            Err(GatewayError::InsufficientFunds {
                available: 10_000,
                required: 20_000
            })
        ));
        assert!(book.hold(hold_id).is_none());

        let Ok(hold) = book.freeze(hold_id, brand, 10_000, LedgerRefs::default(), Utc::now()) else {
            panic!("funded freeze");
        };
        let Ok(again) = book.freeze(hold_id, brand, 10_000, LedgerRefs::default(), Utc::now()) else {
            panic!("replayed freeze");
        };
        assert_eq!(hold, again);
        assert_eq!(book.wallet(brand).available, 0);
        assert_eq!(book.wallet(brand).frozen, 10_000);

        let Ok(_) = book.refund(hold_id, Utc::now()) else {
            panic!("refund");
        };
        assert_eq!(book.wallet(brand).available, 10_000);
        assert_conserved(&book);
    }

    #[test]
    fn funding_rejects_non_positive_amounts() {
        let mut book = LedgerBook::new();
        let result = book.fund_and_freeze(
            LedgerEntryId::new(),
            UserId::new(),
            0,
            &LedgerRefs::default(),
            Utc::now(),
        );
        assert!(matches!(result, Err(GatewayError::InvalidAmount(_))));
        assert!(book.entries().is_empty());
    }

    #[test]
    fn release_is_idempotent() {
        let brand = UserId::new();
        let influencer = UserId::new();
        let mut book = LedgerBook::new();
        let hold_id = escrowed(&mut book, brand, 10_000);
        let Ok(first) = book.release(hold_id, influencer, ten_percent(), Utc::now()) else {
            panic!("release should succeed");
        };
        let Ok(second) = book.release(hold_id, influencer, ten_percent(), Utc::now()) else {
            panic!("second release should be a no-op");
        };
        assert_eq!(first, second);
        assert_eq!(book.wallet(influencer).available, 9_000);
        assert_conserved(&book);
    }

    #[test]
    fn refund_returns_the_hold_as_available_balance() {
        let brand = UserId::new();
        let mut book = funded(brand, 10_000);
        let hold_id = escrowed(&mut book, brand, 40_000);
        let Ok(_) = book.refund(hold_id, Utc::now()) else {
            panic!("refund should succeed");
        };
        let Ok(again) = book.refund(hold_id, Utc::now()) else {
            panic!("refund replay should succeed");
        };
        assert_eq!(again.len(), 1);
        assert_eq!(book.wallet(brand), Wallet {
            user_id: brand,
            available: 50_000,
            frozen: 0,
            withdrawn: 0
        });
        assert!(book.outstanding_holds().is_empty());
        assert_conserved(&book);
    }

    #[test]
    fn hold_settles_at_most_once() {
        let brand = UserId::new();
        let mut book = LedgerBook::new();
        let hold_id = escrowed(&mut book, brand, 40_000);
        let Ok(_) = book.refund(hold_id, Utc::now()) else {
            panic!("refund should succeed");
        };
        let result = book.release(hold_id, UserId::new(), ten_percent(), Utc::now());
        assert!(matches!(result, Err(GatewayError::InvariantViolation(_))));
    }

    #[test]
    fn release_of_unknown_hold_is_an_invariant_violation() {
        let mut book = LedgerBook::new();
        let result = book.release(LedgerEntryId::new(), UserId::new(), ten_percent(), Utc::now());
        assert!(matches!(result, Err(GatewayError::InvariantViolation(_))));
    }

    #[test]
    fn withdraw_moves_available_to_withdrawn() {
        let user = UserId::new();
        let mut book = funded(user, 9_000);
        assert!(matches!(
            book.withdraw(user, 10_000, LedgerRefs::default(), Utc::now()),
            Err(GatewayError::InsufficientFunds {
                available: 9_000,
                required: 10_000
            })
        ));
        assert_eq!(book.entries().len(), 1);
        let Ok(_) = book.withdraw(user, 4_000, LedgerRefs::default(), Utc::now()) else {
            panic!("withdraw should succeed");
        };
        assert_eq!(book.wallet(user).available, 5_000);
        assert_eq!(book.wallet(user).withdrawn, 4_000);
        assert_conserved(&book);
    }

    #[test]
    fn working_book_reports_only_new_rows() {
        let brand = UserId::new();
        let stored = funded(brand, 20_000);
        let mut book = LedgerBook::from_parts(
            stored.wallets().copied().collect(),
            stored.entries().to_vec(),
        );
        escrowed(&mut book, brand, 20_000);
        let changes = book.changes();
        assert_eq!(changes.entries.len(), 2);
        let Some(wallet) = changes.wallets.first() else {
            panic!("brand wallet should be touched");
        };
        assert_eq!(changes.wallets.len(), 1);
        assert_eq!(wallet.available, 20_000);
        assert_eq!(wallet.frozen, 20_000);
    }

    #[test]
    fn nonsense_pairs_have_no_delta() {
        let entry = LedgerEntry::completed(
            LedgerEntryId::new(),
            UserId::new(),
            Direction::Debit,
            EntryKind::Deposit,
            10,
            LedgerRefs::default(),
            Utc::now(),
        );
        assert!(entry.wallet_delta().is_none());
    }
}
