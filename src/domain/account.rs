use super::ids::UserId;
use super::money::{Amount, Balance};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A user's spendable balance; the only authoritative record of funds.
///
/// Mutated by exactly three flows: deposit approval credits, withdrawal
/// reservation debits and rejection refunds, and commission credits.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Account {
    pub user_id: UserId,
    pub balance: Balance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Opens an empty account at registration time.
    pub fn open(user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Balance::ZERO,
            created_at: at,
            updated_at: at,
        }
    }

    /// Applies a signed delta without any floor check.
    pub fn adjust(&mut self, delta: Decimal, at: DateTime<Utc>) {
        self.balance += Balance::new(delta);
        self.updated_at = at;
    }

    /// Debits `amount` only if the balance covers it.
    pub fn reserve(&mut self, amount: Amount, at: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.balance >= Balance::from(amount) {
            self.adjust(-amount.value(), at);
            Ok(())
        } else {
            Err(LedgerError::InsufficientBalance {
                requested: amount.value(),
                available: self.balance.value(),
            })
        }
    }
}
