//! Integer money arithmetic.
//!
//! All amounts are `i64` minor units (paise for INR). Floating point is
//! never used for money; commission is computed in basis points with
//! floor rounding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// An amount in currency minor units.
pub type Minor = i64;

/// Formats minor units as a major-unit decimal, e.g. `300000` → `"3000.00"`.
#[must_use]
pub fn format_minor(amount: Minor) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Inclusive bounds applied to every user-supplied price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountLimits {
    /// Platform minimum (inclusive).
    pub min: Minor,
    /// Sanity ceiling (inclusive).
    pub max: Minor,
}

impl AmountLimits {
    /// Validates a user-supplied amount against the limits.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidAmount`] if the amount is not positive
    /// or falls outside `[min, max]`.
    pub fn check(&self, amount: Minor) -> Result<Minor, GatewayError> {
        if amount <= 0 {
            return Err(GatewayError::InvalidAmount(format!(
                "amount must be positive, got {amount}"
            )));
        }
        if amount < self.min {
            return Err(GatewayError::InvalidAmount(format!(
                "amount {amount} is below the minimum of {}",
                self.min
            )));
        }
        if amount > self.max {
            return Err(GatewayError::InvalidAmount(format!(
                "amount {amount} exceeds the ceiling of {}",
                self.max
            )));
        }
        Ok(amount)
    }
}

impl Default for AmountLimits {
    fn default() -> Self {
        Self {
            min: 100,
            max: 1_000_000_000,
        }
    }
}

/// Platform commission rate in basis points (1% = 100 bps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommissionRate(u32);

impl CommissionRate {
    /// Largest accepted rate (100%).
    pub const MAX_BPS: u32 = 10_000;

    /// Platform default of 10%.
    pub const DEFAULT: Self = Self(1_000);

    /// Creates a rate from basis points.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] above 10 000 bps.
    pub fn from_bps(bps: u32) -> Result<Self, GatewayError> {
        if bps > Self::MAX_BPS {
            return Err(GatewayError::InvalidRequest(format!(
                "commission rate {bps} bps exceeds 100%"
            )));
        }
        Ok(Self(bps))
    }

    /// Returns the rate in basis points.
    #[must_use]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Splits `amount` into `(payout, fee)`.
    ///
    /// `commission = floor(amount * bps / 10000)`, `payout = amount - commission`
    /// and `fee = amount - payout`, so `payout + fee == amount` always holds.
    #[must_use]
    pub fn split(&self, amount: Minor) -> (Minor, Minor) {
        let wide = i128::from(amount) * i128::from(self.0) / 10_000;
        let commission = Minor::try_from(wide).unwrap_or(amount);
        let payout = amount - commission;
        (payout, amount - payout)
    }
}

/// Parses a percentage string such as `"10"` or `"12.5"` into basis points
/// without going through floating point. At most two fractional digits.
impl FromStr for CommissionRate {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GatewayError::InvalidRequest(format!("invalid commission percentage: {s}"));
        let trimmed = s.trim();
        let (whole, frac) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        if whole.is_empty() || frac.len() > 2 {
            return Err(invalid());
        }
        let whole: u32 = whole.parse().map_err(|_| invalid())?;
        let frac_bps: u32 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u32>().map_err(|_| invalid())? * 10,
            _ => frac.parse::<u32>().map_err(|_| invalid())?,
        };
        let bps = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac_bps))
            .ok_or_else(invalid)?;
        Self::from_bps(bps)
    }
}

impl fmt::Display for CommissionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / 100;
        let frac = self.0 % 100;
        if frac == 0 {
            write!(f, "{whole}")
        } else if frac % 10 == 0 {
            write!(f, "{whole}.{}", frac / 10)
        } else {
            write!(f, "{whole}.{frac:02}")
        }
    }
}
