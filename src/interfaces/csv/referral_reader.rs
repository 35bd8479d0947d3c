use crate::domain::ids::UserId;
use crate::domain::referral::{ReferralEdge, ReferralLevel};
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct ReferralRow {
    referrer: UserId,
    referred: UserId,
    level: ReferralLevel,
}

impl From<ReferralRow> for ReferralEdge {
    fn from(row: ReferralRow) -> Self {
        Self {
            referrer_id: row.referrer,
            referred_id: row.referred,
            level: row.level,
        }
    }
}

/// Reads precomputed referral edges from a CSV source.
///
/// Expects a `referrer,referred,level` header. Whitespace around fields is
/// trimmed; a level outside 1..=5 or a malformed id fails that row only.
pub struct ReferralEdgeReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ReferralEdgeReader<R> {
    /// Creates a new `ReferralEdgeReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes edges.
    pub fn edges(self) -> impl Iterator<Item = Result<ReferralEdge>> {
        self.reader
            .into_deserialize::<ReferralRow>()
            .map(|result| result.map(ReferralEdge::from).map_err(LedgerError::from))
    }
}
