//! Platform settings: a cached snapshot for readers and an audited update
//! path for admins.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::money::CommissionRate;
use crate::domain::settings::{COMMISSION_RATE_PCT, SettingAudit};
use crate::domain::user::{Role, User};
use crate::error::GatewayError;
use crate::store::ChatStore;

/// Settings as the flow engine sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsSnapshot {
    /// Commission applied on escrow release.
    pub commission: CommissionRate,
}

/// Read-through cache over the settings table.
///
/// The snapshot is loaded on first use and kept until [`Self::invalidate`].
#[derive(Debug, Clone)]
pub struct SettingsHolder {
    store: Arc<dyn ChatStore>,
    default_commission: CommissionRate,
    cached: Arc<RwLock<Option<SettingsSnapshot>>>,
}

impl SettingsHolder {
    /// Creates a holder falling back to `default_commission` when no
    /// setting is stored.
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>, default_commission: CommissionRate) -> Self {
        Self {
            store,
            default_commission,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Current snapshot.
    ///
    /// # Errors
    ///
    /// Store failures while loading.
    pub async fn snapshot(&self) -> Result<SettingsSnapshot, GatewayError> {
        if let Some(snapshot) = *self.cached.read().await {
            return Ok(snapshot);
        }
        let mut cached = self.cached.write().await;
        if let Some(snapshot) = *cached {
            return Ok(snapshot);
        }
        let commission = match self.store.get_setting(COMMISSION_RATE_PCT).await? {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(value = %raw, error = %e, "stored commission is invalid, using default");
                self.default_commission
            }),
            None => self.default_commission,
        };
        let snapshot = SettingsSnapshot { commission };
        *cached = Some(snapshot);
        Ok(snapshot)
    }

    /// Commission to apply to a release planned now.
    ///
    /// # Errors
    ///
    /// Store failures while loading.
    pub async fn commission_rate(&self) -> Result<CommissionRate, GatewayError> {
        self.snapshot().await.map(|s| s.commission)
    }

    /// Drops the cached snapshot.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}

/// Admin updates with an audit trail.
#[derive(Debug, Clone)]
pub struct SettingsService {
    store: Arc<dyn ChatStore>,
    holder: SettingsHolder,
}

impl SettingsService {
    /// Creates the service over the holder it invalidates.
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>, holder: SettingsHolder) -> Self {
        Self { store, holder }
    }

    /// The shared holder.
    #[must_use]
    pub const fn holder(&self) -> &SettingsHolder {
        &self.holder
    }

    /// Writes a setting and refreshes readers.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Forbidden`] if `admin` is not an admin.
    /// - [`GatewayError::InvalidRequest`] for unknown keys or bad values.
    pub async fn update(
        &self,
        admin: &User,
        key: &str,
        value: &str,
    ) -> Result<SettingAudit, GatewayError> {
        if admin.role != Role::Admin {
            return Err(GatewayError::Forbidden(format!(
                "user {} cannot change settings",
                admin.id
            )));
        }
        match key {
            COMMISSION_RATE_PCT => {
                value.parse::<CommissionRate>()?;
            }
            other => {
                return Err(GatewayError::InvalidRequest(format!("unknown setting: {other}")));
            }
        }
        let audit = self.store.put_setting(key, value.trim(), admin.id).await?;
        self.holder.invalidate().await;
        tracing::info!(key, old = ?audit.old_value, new = %audit.new_value, admin = %admin.id, "setting changed");
        Ok(audit)
    }

    /// Audit trail of `key`, oldest first.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn history(&self, key: &str) -> Result<Vec<SettingAudit>, GatewayError> {
        self.store.setting_history(key).await
    }
}
