use super::ids::{AuditId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    UserEnrolled,
    DepositSubmitted,
    DepositApproved,
    DepositRejected,
    CommissionPaid,
    WithdrawalRequested,
    WithdrawalApproved,
    WithdrawalInProgress,
    WithdrawalCompleted,
    WithdrawalRejected,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserEnrolled => "user_enrolled",
            Self::DepositSubmitted => "deposit_submitted",
            Self::DepositApproved => "deposit_approved",
            Self::DepositRejected => "deposit_rejected",
            Self::CommissionPaid => "commission_paid",
            Self::WithdrawalRequested => "withdrawal_requested",
            Self::WithdrawalApproved => "withdrawal_approved",
            Self::WithdrawalInProgress => "withdrawal_in_progress",
            Self::WithdrawalCompleted => "withdrawal_completed",
            Self::WithdrawalRejected => "withdrawal_rejected",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of one state transition or cascade step.
///
/// Written in the same unit of work as the change it describes.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AuditEntry {
    pub id: AuditId,
    /// Whose record changed.
    pub user_id: UserId,
    /// Who caused it; `None` for self-service actions.
    pub actor: Option<UserId>,
    pub action: AuditAction,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        user_id: UserId,
        actor: Option<UserId>,
        action: AuditAction,
        details: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditId::new(),
            user_id,
            actor,
            action,
            details,
            created_at: at,
        }
    }
}
