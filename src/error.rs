use crate::domain::ids::{DepositId, UserId, WithdrawalId};
use crate::domain::withdrawal::WithdrawalStatus;
use miette::Diagnostic;
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Broad classes of failure, used by callers to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before any state change; surfaced verbatim.
    Validation,
    /// Caller lacks the privilege for the operation.
    Authorization,
    /// The referenced record does not exist.
    NotFound,
    /// The record is not in a state that permits the operation.
    Conflict,
    /// Storage failed; nothing was committed.
    Infrastructure,
}

#[derive(Error, Diagnostic, Debug)]
pub enum LedgerError {
    #[error("forbidden")]
    #[diagnostic(code(ledger::unauthorized))]
    Unauthorized,

    #[error("deposit {0} not found")]
    #[diagnostic(code(ledger::deposit_not_found))]
    DepositNotFound(DepositId),

    #[error("withdrawal {0} not found")]
    #[diagnostic(code(ledger::withdrawal_not_found))]
    WithdrawalNotFound(WithdrawalId),

    #[error("account for user {0} not found")]
    #[diagnostic(code(ledger::account_not_found))]
    AccountNotFound(UserId),

    #[error("deposit {0} already processed")]
    #[diagnostic(
        code(ledger::already_processed),
        help("re-read the deposit; it has already been resolved")
    )]
    AlreadyProcessed(DepositId),

    #[error("invalid withdrawal transition from {from} to {to}")]
    #[diagnostic(code(ledger::invalid_transition))]
    InvalidTransition {
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },

    #[error("insufficient balance: requested {requested}, available {available}")]
    #[diagnostic(code(ledger::insufficient_balance))]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    #[error("amount {amount} outside allowed range {min}..={max}")]
    #[diagnostic(code(ledger::amount_out_of_range))]
    AmountOutOfRange {
        amount: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("invalid amount {amount}: {reason}")]
    #[diagnostic(code(ledger::invalid_amount))]
    InvalidAmount { amount: Decimal, reason: String },

    #[error("invalid proof of payment: {0}")]
    #[diagnostic(code(ledger::invalid_proof))]
    InvalidProof(String),

    #[error("invalid payout destination")]
    #[diagnostic(code(ledger::invalid_destination))]
    InvalidDestination,

    #[error("referral level {0} outside 1..=5")]
    #[diagnostic(code(ledger::invalid_referral_level))]
    InvalidReferralLevel(u8),

    #[error("invalid referral data: {0}")]
    #[diagnostic(
        code(ledger::invalid_referral),
        help("each user has at most one ancestor per level and never appears in their own upline")
    )]
    InvalidReferral(String),

    #[error("user {0} is already enrolled")]
    #[diagnostic(code(ledger::already_enrolled))]
    AlreadyEnrolled(UserId),

    #[error("referrer {0} is not enrolled")]
    #[diagnostic(code(ledger::unknown_referrer))]
    UnknownReferrer(UserId),

    #[error("timed out waiting for lock on {0}")]
    #[diagnostic(code(ledger::lock_timeout))]
    LockTimeout(String),

    #[error("storage error: {0}")]
    #[diagnostic(code(ledger::storage))]
    Storage(String),

    #[error("configuration error: {0}")]
    #[diagnostic(code(ledger::config))]
    Config(String),

    #[error("CSV error: {0}")]
    #[diagnostic(code(ledger::csv))]
    Csv(#[from] csv::Error),
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AmountOutOfRange { .. }
            | Self::InvalidAmount { .. }
            | Self::InvalidProof(_)
            | Self::InvalidDestination
            | Self::InvalidReferralLevel(_)
            | Self::InvalidReferral(_)
            | Self::UnknownReferrer(_)
            | Self::Config(_)
            | Self::Csv(_) => ErrorCategory::Validation,

            Self::Unauthorized => ErrorCategory::Authorization,

            Self::DepositNotFound(_) | Self::WithdrawalNotFound(_) | Self::AccountNotFound(_) => {
                ErrorCategory::NotFound
            }

            Self::AlreadyProcessed(_)
            | Self::InvalidTransition { .. }
            | Self::InsufficientBalance { .. }
            | Self::AlreadyEnrolled(_) => ErrorCategory::Conflict,

            Self::LockTimeout(_) | Self::Storage(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Whether the caller may safely retry the whole operation after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Conflict | ErrorCategory::Infrastructure
        )
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization error: {err}"))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(err.into_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unauthorized_reveals_nothing() {
        assert_eq!(LedgerError::Unauthorized.to_string(), "forbidden");
    }

    #[test]
    fn test_categories() {
        let conflict = LedgerError::InsufficientBalance {
            requested: dec!(10),
            available: dec!(5),
        };
        assert_eq!(conflict.category(), ErrorCategory::Conflict);
        assert!(conflict.is_retryable());

        let validation = LedgerError::AmountOutOfRange {
            amount: dec!(1),
            min: dec!(10),
            max: dec!(100),
        };
        assert_eq!(validation.category(), ErrorCategory::Validation);
        assert!(!validation.is_retryable());

        let infra = LedgerError::Storage("disk gone".to_string());
        assert_eq!(infra.category(), ErrorCategory::Infrastructure);
        assert!(infra.is_retryable());

        let referral = LedgerError::InvalidReferral("cycle".to_string());
        assert_eq!(referral.category(), ErrorCategory::Validation);
        assert!(!referral.is_retryable());

        assert_eq!(
            LedgerError::Unauthorized.category(),
            ErrorCategory::Authorization
        );
    }

    #[test]
    fn test_diagnostic_code() {
        let err = LedgerError::AlreadyProcessed(DepositId::new());
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("ledger::already_processed"));
    }
}
