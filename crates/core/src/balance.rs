//! Balance lookups.

use crate::{AccountId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Result of one successful billing lookup for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    /// Remaining balance in the billing system's currency unit.
    pub balance: Decimal,
    pub user_number: Option<String>,
    pub user_name: Option<String>,
    pub address: Option<String>,
    pub customer_name: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl AccountBalance {
    /// Balance rounded to cents for display.
    pub fn display_balance(&self) -> String {
        format_amount(self.balance)
    }
}

/// Format an amount with exactly two decimal places, rounding half away from zero.
pub fn format_amount(amount: Decimal) -> String {
    let cents = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.2}", cents)
}

/// A bound user's balance at one point in a sweep. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub user_id: UserId,
    pub balance: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    pub fn new(user_id: UserId, lookup: &AccountBalance) -> Self {
        Self {
            user_id,
            balance: lookup.balance,
            fetched_at: lookup.fetched_at,
        }
    }

    /// Strictly below the threshold; a balance equal to it is fine.
    #[inline]
    pub fn is_below(&self, threshold: Decimal) -> bool {
        self.balance < threshold
    }
}
