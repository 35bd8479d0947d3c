//! Application layer orchestrating the ledger's use cases.
//!
//! [`Ledger`](ledger::Ledger) is the single entry point. Deposit and withdrawal
//! flows live in their own modules as further `impl Ledger` blocks; the
//! commission cascade is a separate engine the deposit flow drives.

pub mod cascade;
mod deposits;
pub mod ledger;
mod withdrawals;

#[cfg(test)]
mod cascade_props;

pub use cascade::{CommissionCascade, PlannedCommission};
pub use ledger::{Ledger, LevelSummary};
