//! Adapters that feed external data into the ledger.

pub mod csv;
