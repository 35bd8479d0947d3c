use super::ids::{DepositId, UserId};
use super::money::Amount;
use super::proof::ProofReference;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Approved,
    Rejected,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrator verdict on a pending deposit.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn target(self) -> DepositStatus {
        match self {
            Self::Approve => DepositStatus::Approved,
            Self::Reject => DepositStatus::Rejected,
        }
    }
}

/// A claimed incoming payment awaiting review.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Deposit {
    pub id: DepositId,
    pub owner_id: UserId,
    /// Fixed at submission.
    pub amount: Amount,
    pub proof: ProofReference,
    pub status: DepositStatus,
    pub admin_note: Option<String>,
    pub resolved_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deposit {
    pub fn submit(owner_id: UserId, amount: Amount, proof: ProofReference, at: DateTime<Utc>) -> Self {
        Self {
            id: DepositId::new(),
            owner_id,
            amount,
            proof,
            status: DepositStatus::Pending,
            admin_note: None,
            resolved_by: None,
            created_at: at,
            updated_at: at,
        }
    }

    /// Moves a pending deposit to its terminal status.
    ///
    /// Any second resolution fails with `AlreadyProcessed` and leaves the
    /// record untouched.
    pub fn resolve(
        &mut self,
        decision: Decision,
        admin_id: UserId,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<DepositStatus, LedgerError> {
        if self.status.is_terminal() {
            return Err(LedgerError::AlreadyProcessed(self.id));
        }
        self.status = decision.target();
        self.admin_note = note;
        self.resolved_by = Some(admin_id);
        self.updated_at = at;
        Ok(self.status)
    }
}
