//! Platform settings rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Commission charged on every escrow release, as a percentage string.
pub const COMMISSION_RATE_PCT: &str = "commission_rate_pct";

/// One change to a setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingAudit {
    /// Setting key.
    pub key: String,
    /// Value before the change.
    pub old_value: Option<String>,
    /// Value after the change.
    pub new_value: String,
    /// Admin who made the change.
    pub changed_by: UserId,
    /// When.
    pub changed_at: DateTime<Utc>,
}
