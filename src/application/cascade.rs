use crate::domain::audit::{AuditAction, AuditEntry};
use crate::domain::commission::{Commission, CommissionStatus, RateSchedule};
use crate::domain::deposit::Deposit;
use crate::domain::ids::{CommissionId, UserId};
use crate::domain::ports::LedgerTransaction;
use crate::domain::referral::{Ancestors, ReferralLevel};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::debug;

use super::ledger::adjust;

/// One commission credit decided before any row is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommission {
    pub level: ReferralLevel,
    pub referrer_id: UserId,
    pub rate: Decimal,
    pub amount: Decimal,
}

/// Propagates a deposit approval to the depositor's referral ancestors.
///
/// The rate table is injected rather than fixed, so alternate schedules can
/// be exercised without touching the engine.
#[derive(Debug, Clone)]
pub struct CommissionCascade {
    rates: RateSchedule,
    scale: u32,
}

impl CommissionCascade {
    pub fn new(rates: RateSchedule, scale: u32) -> Self {
        Self { rates, scale }
    }

    pub fn rates(&self) -> &RateSchedule {
        &self.rates
    }

    /// Commission credits owed for a deposit of `amount`, in ascending level
    /// order. Levels without a configured rate are skipped.
    pub fn plan(&self, amount: Decimal, ancestors: &Ancestors) -> Vec<PlannedCommission> {
        ancestors
            .iter()
            .filter_map(|(level, referrer_id)| {
                let rate = self.rates.rate_for(level)?;
                let amount = self.rates.commission(amount, level, self.scale)?;
                Some(PlannedCommission {
                    level,
                    referrer_id,
                    rate,
                    amount,
                })
            })
            .collect()
    }

    /// Stages every commission for an approved deposit inside `tx`.
    ///
    /// Ancestor accounts are locked in ascending level order, after the
    /// depositor. A missing ancestor account fails the whole unit of work.
    pub async fn apply(
        &self,
        tx: &mut dyn LedgerTransaction,
        deposit: &Deposit,
        ancestors: &Ancestors,
        admin_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<Vec<Commission>> {
        let plan = self.plan(deposit.amount.value(), ancestors);
        let mut paid = Vec::with_capacity(plan.len());

        for step in plan {
            adjust(tx, step.referrer_id, step.amount, at).await?;

            let commission = Commission {
                id: CommissionId::new(),
                referrer_id: step.referrer_id,
                referred_id: deposit.owner_id,
                deposit_id: deposit.id,
                level: step.level,
                rate: step.rate,
                commission_amount: step.amount,
                status: CommissionStatus::Paid,
                created_at: at,
            };
            tx.stage_commission(commission.clone());
            tx.stage_audit(AuditEntry::new(
                step.referrer_id,
                Some(admin_id),
                AuditAction::CommissionPaid,
                json!({
                    "commission_id": commission.id,
                    "deposit_id": deposit.id,
                    "referred_id": deposit.owner_id,
                    "level": step.level.get(),
                    "rate": step.rate,
                    "amount": step.amount,
                }),
                at,
            ));
            debug!(
                deposit_id = %deposit.id,
                referrer_id = %step.referrer_id,
                level = step.level.get(),
                amount = %step.amount,
                "commission staged"
            );
            paid.push(commission);
        }

        Ok(paid)
    }
}
