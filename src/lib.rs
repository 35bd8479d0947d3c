//! Referral-commission ledger.
//!
//! Tracks user balances fed by administrator-approved deposits, pays
//! commissions up to five generations of referrers on every approval, and
//! reserves funds for withdrawals as soon as they are requested. Every state
//! change commits atomically together with its audit entries.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;

pub use application::Ledger;
pub use config::LedgerConfig;
pub use error::{LedgerError, Result};
