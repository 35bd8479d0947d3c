//! CSV import of precomputed referral edges.

pub mod referral_reader;

pub use referral_reader::ReferralEdgeReader;
