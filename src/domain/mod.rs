//! Domain types, invariants and the ports the application layer drives.

pub mod account;
pub mod audit;
pub mod caller;
pub mod commission;
pub mod deposit;
pub mod ids;
pub mod money;
pub mod ports;
pub mod proof;
pub mod referral;
pub mod withdrawal;
