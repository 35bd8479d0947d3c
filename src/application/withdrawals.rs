//! Withdrawal state machine. Funds are reserved when the request is made
//! and returned only if an administrator rejects it.

use super::ledger::{Ledger, adjust};
use crate::domain::audit::{AuditAction, AuditEntry};
use crate::domain::caller::Caller;
use crate::domain::ids::{UserId, WithdrawalId};
use crate::domain::withdrawal::{Withdrawal, WithdrawalStatus};
use crate::error::{LedgerError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, instrument, warn};

impl Ledger {
    /// Creates a pending withdrawal and debits its amount in the same unit
    /// of work. The owner's account row stays locked from the sufficiency
    /// check until commit, so concurrent requests cannot both pass against
    /// a stale balance.
    #[instrument(skip(self, destination))]
    pub async fn request_withdrawal(
        &self,
        owner_id: UserId,
        amount: Decimal,
        destination: impl Into<String> + Send,
    ) -> Result<Withdrawal> {
        let amount = self
            .config
            .withdrawal_limits
            .check(amount, self.config.currency_scale)?;
        let now = Utc::now();
        let withdrawal = Withdrawal::request(owner_id, amount, destination.into(), now)?;

        let mut tx = self.store.begin().await?;
        let mut account = tx
            .lock_account(owner_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(owner_id))?;

        if let Err(err) = account.reserve(amount, now) {
            warn!(%owner_id, amount = %amount.value(), balance = %account.balance.value(), "insufficient balance for withdrawal");
            return Err(err);
        }

        tx.stage_account(account);
        tx.stage_withdrawal(withdrawal.clone());
        tx.stage_audit(AuditEntry::new(
            owner_id,
            None,
            AuditAction::WithdrawalRequested,
            json!({
                "withdrawal_id": withdrawal.id,
                "amount": withdrawal.amount,
                "destination": withdrawal.destination,
            }),
            now,
        ));
        tx.commit().await?;

        info!(withdrawal_id = %withdrawal.id, %owner_id, amount = %amount.value(), "withdrawal requested");
        Ok(withdrawal)
    }

    /// Moves a withdrawal one step along its lifecycle.
    ///
    /// Only `pending -> rejected` touches a balance: it refunds the reserved
    /// amount to the owner.
    #[instrument(skip(self, caller, note), fields(admin_id = %caller.user_id))]
    pub async fn advance_withdrawal(
        &self,
        caller: &Caller,
        withdrawal_id: WithdrawalId,
        target: WithdrawalStatus,
        note: Option<String>,
    ) -> Result<Withdrawal> {
        let admin_id = caller.require_admin()?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let mut withdrawal = tx
            .lock_withdrawal(withdrawal_id)
            .await?
            .ok_or(LedgerError::WithdrawalNotFound(withdrawal_id))?;

        let from = match withdrawal.advance(target, admin_id, note, now) {
            Ok(from) => from,
            Err(err) => {
                warn!(%withdrawal_id, from = %withdrawal.status, to = %target, "invalid withdrawal transition");
                return Err(err);
            }
        };

        let action = match target {
            WithdrawalStatus::Approved => AuditAction::WithdrawalApproved,
            WithdrawalStatus::InProgress => AuditAction::WithdrawalInProgress,
            WithdrawalStatus::Completed => AuditAction::WithdrawalCompleted,
            WithdrawalStatus::Rejected => {
                adjust(tx.as_mut(), withdrawal.owner_id, withdrawal.amount.value(), now).await?;
                AuditAction::WithdrawalRejected
            }
            WithdrawalStatus::Pending => {
                return Err(LedgerError::InvalidTransition { from, to: target });
            }
        };

        tx.stage_withdrawal(withdrawal.clone());
        tx.stage_audit(AuditEntry::new(
            withdrawal.owner_id,
            Some(admin_id),
            action,
            json!({
                "withdrawal_id": withdrawal.id,
                "from": from,
                "to": target,
                "amount": withdrawal.amount,
                "note": withdrawal.admin_note,
            }),
            now,
        ));
        tx.commit().await?;

        info!(%withdrawal_id, %from, to = %target, "withdrawal advanced");
        Ok(withdrawal)
    }
}
