use super::ids::{CommissionId, DepositId, UserId};
use super::money::round_minor_units;
use super::referral::ReferralLevel;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Commissions are created already settled; there is no pending state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Paid,
}

/// One credit paid to a referral ancestor for one approved deposit.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Commission {
    pub id: CommissionId,
    /// Beneficiary.
    pub referrer_id: UserId,
    /// Depositor whose approval triggered the credit.
    pub referred_id: UserId,
    pub deposit_id: DepositId,
    pub level: ReferralLevel,
    /// Fraction applied, e.g. 0.10 for 10%.
    pub rate: Decimal,
    pub commission_amount: Decimal,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
}

/// Per-level commission rates, level 1 first.
///
/// Levels past the end of the schedule earn nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Decimal>", into = "Vec<Decimal>")]
pub struct RateSchedule(Vec<Decimal>);

impl Default for RateSchedule {
    fn default() -> Self {
        Self(vec![dec!(0.10), dec!(0.08), dec!(0.06), dec!(0.04), dec!(0.02)])
    }
}

impl RateSchedule {
    pub fn new(rates: Vec<Decimal>) -> Result<Self, LedgerError> {
        if rates.len() > usize::from(ReferralLevel::MAX) {
            return Err(LedgerError::Config(format!(
                "{} commission rates given, at most {} levels exist",
                rates.len(),
                ReferralLevel::MAX
            )));
        }
        if let Some(bad) = rates
            .iter()
            .find(|rate| **rate < Decimal::ZERO || **rate > Decimal::ONE)
        {
            return Err(LedgerError::Config(format!(
                "commission rate {bad} outside 0..=1"
            )));
        }
        Ok(Self(rates))
    }

    pub fn rate_for(&self, level: ReferralLevel) -> Option<Decimal> {
        self.0.get(usize::from(level.get()) - 1).copied()
    }

    pub fn rates(&self) -> &[Decimal] {
        &self.0
    }

    /// Commission owed at `level` for a deposit of `amount`, rounded
    /// half-even to `scale` decimal places.
    pub fn commission(&self, amount: Decimal, level: ReferralLevel, scale: u32) -> Option<Decimal> {
        self.rate_for(level)
            .map(|rate| round_minor_units(amount * rate, scale))
    }
}

impl TryFrom<Vec<Decimal>> for RateSchedule {
    type Error = LedgerError;

    fn try_from(rates: Vec<Decimal>) -> Result<Self, Self::Error> {
        Self::new(rates)
    }
}

impl From<RateSchedule> for Vec<Decimal> {
    fn from(schedule: RateSchedule) -> Self {
        schedule.0
    }
}
