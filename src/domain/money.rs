use crate::error::LedgerError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A spendable balance.
///
/// Wraps `rust_decimal::Decimal` so balances and request amounts cannot be
/// mixed up by accident. Arithmetic is unchecked for sign: refunds and
/// credits must always succeed, so a balance refuses nothing on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub Decimal);

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// A strictly positive monetary amount carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, LedgerError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(LedgerError::InvalidAmount {
                amount: value,
                reason: "amount must be positive".to_string(),
            })
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

/// Inclusive bounds a request amount must fall within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAmountRange")]
pub struct AmountRange {
    min: Decimal,
    max: Decimal,
}

#[derive(Deserialize)]
struct RawAmountRange {
    min: Decimal,
    max: Decimal,
}

impl TryFrom<RawAmountRange> for AmountRange {
    type Error = LedgerError;

    fn try_from(raw: RawAmountRange) -> Result<Self, Self::Error> {
        Self::new(raw.min, raw.max)
    }
}

impl AmountRange {
    pub fn new(min: Decimal, max: Decimal) -> Result<Self, LedgerError> {
        if min <= Decimal::ZERO || min > max {
            return Err(LedgerError::Config(format!(
                "amount range {min}..={max} must satisfy 0 < min <= max"
            )));
        }
        Ok(Self { min, max })
    }

    /// Builds a range from bounds already known to satisfy `0 < min <= max`.
    pub(crate) const fn from_bounds(min: Decimal, max: Decimal) -> Self {
        Self { min, max }
    }

    pub fn min(&self) -> Decimal {
        self.min
    }

    pub fn max(&self) -> Decimal {
        self.max
    }

    /// Validates a requested amount against the range and the currency scale.
    pub fn check(&self, value: Decimal, scale: u32) -> Result<Amount, LedgerError> {
        let amount = Amount::new(value)?;
        if value.normalize().scale() > scale {
            return Err(LedgerError::InvalidAmount {
                amount: value,
                reason: format!("more than {scale} decimal places"),
            });
        }
        if value < self.min || value > self.max {
            return Err(LedgerError::AmountOutOfRange {
                amount: value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(amount)
    }
}

/// Rounds to minor-unit precision with banker's rounding.
pub fn round_minor_units(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven)
}
