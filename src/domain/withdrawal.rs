use super::ids::{UserId, WithdrawalId};
use super::money::Amount;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Withdrawal lifecycle.
///
/// Legal transitions:
/// - Pending → Approved → InProgress → Completed
/// - Pending → Rejected (refunds the reservation)
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    InProgress,
    Completed,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }

    pub fn can_transition_to(&self, target: WithdrawalStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
                | (Self::Approved, Self::InProgress)
                | (Self::InProgress, Self::Completed)
        )
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A claimed outgoing payment. Its amount is already debited from the
/// owner's balance when the record exists.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub owner_id: UserId,
    pub amount: Amount,
    /// Opaque payout address.
    pub destination: String,
    pub status: WithdrawalStatus,
    pub admin_note: Option<String>,
    pub processed_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn request(
        owner_id: UserId,
        amount: Amount,
        destination: String,
        at: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let destination = destination.trim().to_string();
        if destination.is_empty() {
            return Err(LedgerError::InvalidDestination);
        }
        Ok(Self {
            id: WithdrawalId::new(),
            owner_id,
            amount,
            destination,
            status: WithdrawalStatus::Pending,
            admin_note: None,
            processed_by: None,
            created_at: at,
            updated_at: at,
        })
    }

    /// Applies one legal transition and returns the previous status.
    pub fn advance(
        &mut self,
        target: WithdrawalStatus,
        admin_id: UserId,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<WithdrawalStatus, LedgerError> {
        let from = self.status;
        if !from.can_transition_to(target) {
            return Err(LedgerError::InvalidTransition { from, to: target });
        }
        self.status = target;
        if note.is_some() {
            self.admin_note = note;
        }
        self.processed_by = Some(admin_id);
        self.updated_at = at;
        Ok(from)
    }
}
