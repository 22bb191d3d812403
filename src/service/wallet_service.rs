//! Wallet reads and withdrawals.

use std::sync::Arc;

use crate::domain::ledger::{LedgerEntry, LedgerRefs, Wallet};
use crate::domain::money::{AmountLimits, Minor};
use crate::domain::UserId;
use crate::error::GatewayError;
use crate::external::{PaymentGateway, PayoutRequest, RetryPolicy};
use crate::store::ChatStore;

/// Result of a withdrawal.
#[derive(Debug, Clone)]
pub struct Withdrawal {
    /// Balances after the debit.
    pub wallet: Wallet,
    /// The `withdrawal` ledger entry.
    pub entry: LedgerEntry,
    /// Gateway payout id; `None` if the payout is still owed.
    pub payout_id: Option<String>,
}

/// Balances, history and payouts.
#[derive(Debug, Clone)]
pub struct WalletService {
    store: Arc<dyn ChatStore>,
    gateway: Arc<dyn PaymentGateway>,
    retry: RetryPolicy,
    currency: String,
    limits: AmountLimits,
}

impl WalletService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn ChatStore>,
        gateway: Arc<dyn PaymentGateway>,
        retry: RetryPolicy,
        currency: impl Into<String>,
        limits: AmountLimits,
    ) -> Self {
        Self {
            store,
            gateway,
            retry,
            currency: currency.into(),
            limits,
        }
    }

    /// Current balances of `user`. Users without entries get an empty
    /// wallet.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn wallet(&self, user: UserId) -> Result<Wallet, GatewayError> {
        self.store.wallet(user).await
    }

    /// Ledger entries of `user`, newest first.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn ledger(&self, user: UserId) -> Result<Vec<LedgerEntry>, GatewayError> {
        self.store.ledger_entries(user).await
    }

    /// Debits `amount` from the available balance and pays it out.
    ///
    /// The ledger is written first. A payout that still fails after the
    /// retries is logged and left for reconciliation; the debit stands.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidAmount`] outside the platform limits and
    /// [`GatewayError::InsufficientFunds`] when the balance is short.
    pub async fn withdraw(&self, user: UserId, amount: Minor) -> Result<Withdrawal, GatewayError> {
        self.limits.check(amount)?;
        let (wallet, entry) = self
            .store
            .withdraw(user, amount, LedgerRefs::default())
            .await?;
        tracing::info!(user_id = %user, entry_id = %entry.id, amount_minor = amount, "withdrawal debited");

        let request = PayoutRequest {
            user_id: user,
            amount_minor: amount,
            currency: self.currency.clone(),
            reference: entry.id.to_string(),
        };
        let payout = self
            .retry
            .run("payout", || {
                let gateway = Arc::clone(&self.gateway);
                let request = request.clone();
                async move { gateway.payout(request).await }
            })
            .await;
        let payout_id = match payout {
            Ok(receipt) => Some(receipt.payout_id),
            Err(e) => {
                tracing::error!(user_id = %user, entry_id = %entry.id, error = %e, "payout failed");
                None
            }
        };
        Ok(Withdrawal {
            wallet,
            entry,
            payout_id,
        })
    }
}
