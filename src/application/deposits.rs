//! Deposit state machine: pending until an administrator approves or
//! rejects it, exactly once.

use super::ledger::{Ledger, adjust};
use crate::domain::audit::{AuditAction, AuditEntry};
use crate::domain::caller::Caller;
use crate::domain::deposit::{Decision, Deposit};
use crate::domain::ids::{DepositId, UserId};
use crate::domain::ports::ReferralGraph;
use crate::domain::proof::ProofReference;
use crate::error::{LedgerError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, instrument, warn};

impl Ledger {
    /// Records a claimed payment as a pending deposit. No balance changes
    /// until an administrator approves it.
    #[instrument(skip(self, proof))]
    pub async fn submit_deposit(
        &self,
        owner_id: UserId,
        amount: Decimal,
        proof: ProofReference,
    ) -> Result<Deposit> {
        let amount = self
            .config
            .deposit_limits
            .check(amount, self.config.currency_scale)?;
        self.proofs.verify(owner_id, &proof).await?;
        if self.store.account(owner_id).await?.is_none() {
            return Err(LedgerError::AccountNotFound(owner_id));
        }

        let now = Utc::now();
        let deposit = Deposit::submit(owner_id, amount, proof, now);

        let mut tx = self.store.begin().await?;
        tx.stage_deposit(deposit.clone());
        tx.stage_audit(AuditEntry::new(
            owner_id,
            None,
            AuditAction::DepositSubmitted,
            json!({
                "deposit_id": deposit.id,
                "amount": deposit.amount,
                "proof": deposit.proof,
            }),
            now,
        ));
        tx.commit().await?;

        info!(deposit_id = %deposit.id, %owner_id, amount = %amount.value(), "deposit submitted");
        Ok(deposit)
    }

    /// Approves or rejects a pending deposit.
    ///
    /// Approval credits the depositor and pays every ancestor's commission
    /// in the same unit of work as the status change. The deposit row is
    /// locked first, so of two concurrent resolutions exactly one succeeds
    /// and the other observes `AlreadyProcessed`.
    #[instrument(skip(self, caller, note), fields(admin_id = %caller.user_id))]
    pub async fn resolve_deposit(
        &self,
        caller: &Caller,
        deposit_id: DepositId,
        decision: Decision,
        note: Option<String>,
    ) -> Result<Deposit> {
        let admin_id = caller.require_admin()?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let mut deposit = tx
            .lock_deposit(deposit_id)
            .await?
            .ok_or(LedgerError::DepositNotFound(deposit_id))?;

        if let Err(err) = deposit.resolve(decision, admin_id, note, now) {
            warn!(%deposit_id, status = %deposit.status, "deposit already processed");
            return Err(err);
        }
        tx.stage_deposit(deposit.clone());

        let commissions = match decision {
            Decision::Approve => {
                adjust(tx.as_mut(), deposit.owner_id, deposit.amount.value(), now).await?;
                tx.stage_audit(AuditEntry::new(
                    deposit.owner_id,
                    Some(admin_id),
                    AuditAction::DepositApproved,
                    json!({
                        "deposit_id": deposit.id,
                        "amount": deposit.amount,
                        "note": deposit.admin_note,
                    }),
                    now,
                ));

                let ancestors = self.store.ancestors(deposit.owner_id).await?;
                self.cascade
                    .apply(tx.as_mut(), &deposit, &ancestors, admin_id, now)
                    .await?
            }
            Decision::Reject => {
                tx.stage_audit(AuditEntry::new(
                    deposit.owner_id,
                    Some(admin_id),
                    AuditAction::DepositRejected,
                    json!({
                        "deposit_id": deposit.id,
                        "note": deposit.admin_note,
                    }),
                    now,
                ));
                Vec::new()
            }
        };

        tx.commit().await?;

        info!(
            %deposit_id,
            status = %deposit.status,
            commissions = commissions.len(),
            "deposit resolved"
        );
        Ok(deposit)
    }
}

#[cfg(test)]
mod tests {
    use crate::application::ledger::Ledger;
    use crate::config::LedgerConfig;
    use crate::domain::caller::Caller;
    use crate::domain::deposit::{Decision, DepositStatus};
    use crate::domain::ids::{DepositId, UserId};
    use crate::domain::proof::ProofReference;
    use crate::error::LedgerError;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use crate::infrastructure::proof::PrevalidatedProofs;
    use rust_decimal_macros::dec;

    fn ledger() -> Ledger {
        Ledger::new(
            LedgerConfig::default(),
            Box::new(InMemoryLedgerStore::default()),
            Box::new(PrevalidatedProofs),
        )
    }

    fn proof() -> ProofReference {
        ProofReference::new("uploads/receipt.png").unwrap()
    }

    #[tokio::test]
    async fn test_reject_leaves_balance_untouched() {
        let ledger = ledger();
        let user = UserId::new();
        ledger.enroll_user(user, None).await.unwrap();

        let deposit = ledger.submit_deposit(user, dec!(100), proof()).await.unwrap();
        let resolved = ledger
            .resolve_deposit(
                &Caller::admin(UserId::new()),
                deposit.id,
                Decision::Reject,
                Some("blurry receipt".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(resolved.status, DepositStatus::Rejected);
        assert_eq!(resolved.admin_note.as_deref(), Some("blurry receipt"));
        assert_eq!(ledger.balance(user).await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_second_resolution_is_already_processed() {
        let ledger = ledger();
        let user = UserId::new();
        let admin = Caller::admin(UserId::new());
        ledger.enroll_user(user, None).await.unwrap();

        let deposit = ledger.submit_deposit(user, dec!(250), proof()).await.unwrap();
        ledger
            .resolve_deposit(&admin, deposit.id, Decision::Approve, None)
            .await
            .unwrap();

        for decision in [Decision::Approve, Decision::Reject] {
            assert!(matches!(
                ledger.resolve_deposit(&admin, deposit.id, decision, None).await,
                Err(LedgerError::AlreadyProcessed(_))
            ));
        }
        assert_eq!(ledger.balance(user).await.unwrap(), dec!(250));
    }

    #[tokio::test]
    async fn test_non_admin_and_unknown_deposit() {
        let ledger = ledger();
        let user = UserId::new();
        ledger.enroll_user(user, None).await.unwrap();
        let deposit = ledger.submit_deposit(user, dec!(50), proof()).await.unwrap();

        assert!(matches!(
            ledger
                .resolve_deposit(&Caller::user(user), deposit.id, Decision::Approve, None)
                .await,
            Err(LedgerError::Unauthorized)
        ));
        assert!(matches!(
            ledger
                .resolve_deposit(&Caller::admin(UserId::new()), DepositId::new(), Decision::Approve, None)
                .await,
            Err(LedgerError::DepositNotFound(_))
        ));
        assert_eq!(
            ledger.deposit(deposit.id).await.unwrap().status,
            DepositStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_submit_validates_amount() {
        let ledger = ledger();
        let user = UserId::new();
        ledger.enroll_user(user, None).await.unwrap();

        assert!(matches!(
            ledger.submit_deposit(user, dec!(9.99), proof()).await,
            Err(LedgerError::AmountOutOfRange { .. })
        ));
        assert!(matches!(
            ledger.submit_deposit(user, dec!(100000.01), proof()).await,
            Err(LedgerError::AmountOutOfRange { .. })
        ));
        assert!(matches!(
            ledger.submit_deposit(user, dec!(12.345), proof()).await,
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(ledger.submit_deposit(user, dec!(10), proof()).await.is_ok());
    }
}
