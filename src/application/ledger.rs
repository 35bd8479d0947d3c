use super::cascade::CommissionCascade;
use crate::config::LedgerConfig;
use crate::domain::account::Account;
use crate::domain::audit::{AuditAction, AuditEntry};
use crate::domain::commission::Commission;
use crate::domain::deposit::Deposit;
use crate::domain::ids::{DepositId, UserId, WithdrawalId};
use crate::domain::ports::{LedgerStoreBox, LedgerTransaction, ProofVerifierBox, ReferralGraph};
use crate::domain::referral::{self, Ancestors, ReferralEdge, ReferralLevel};
use crate::domain::withdrawal::Withdrawal;
use crate::error::{LedgerError, Result};
use crate::interfaces::csv::ReferralEdgeReader;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Read;
use tracing::{info, instrument, warn};

/// The entry point for every ledger operation.
///
/// `Ledger` owns the storage backends and collaborators. Each state-changing
/// operation runs as one unit of work on the store: rows are locked as they
/// are read, writes are staged, and everything commits together or not at
/// all. Returning early with an error drops the unit of work, which discards
/// its staged writes.
pub struct Ledger {
    pub(super) config: LedgerConfig,
    pub(super) store: LedgerStoreBox,
    pub(super) proofs: ProofVerifierBox,
    pub(super) cascade: CommissionCascade,
}

/// Per-level view of a referrer's network and earnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSummary {
    pub level: ReferralLevel,
    /// `None` when the schedule pays nothing at this level.
    pub rate: Option<Decimal>,
    pub referred_users: usize,
    pub commission_total: Decimal,
}

impl Ledger {
    /// Creates a new `Ledger`.
    ///
    /// # Arguments
    ///
    /// * `config` - Limits, rate schedule and currency scale.
    /// * `store` - Accounts, requests, commissions, referral ancestor sets
    ///   and audit log. Its row locks should wait `config.lock_timeout()`.
    /// * `proofs` - Verifier for proof-of-payment references.
    pub fn new(config: LedgerConfig, store: LedgerStoreBox, proofs: ProofVerifierBox) -> Self {
        let cascade = CommissionCascade::new(config.commission_rates.clone(), config.currency_scale);
        Self {
            config,
            store,
            proofs,
            cascade,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Opens a zero-balance account and records the user's referral ancestors.
    ///
    /// The direct referrer becomes the level-1 ancestor and the referrer's
    /// own ancestors move one level deeper, truncated at level 5. A user whose
    /// ancestors were imported keeps them. The account, the ancestor set and
    /// the audit entry commit together.
    #[instrument(skip(self))]
    pub async fn enroll_user(&self, user_id: UserId, referred_by: Option<UserId>) -> Result<Account> {
        if let Some(referrer_id) = referred_by
            && self.store.account(referrer_id).await?.is_none()
        {
            return Err(LedgerError::UnknownReferrer(referrer_id));
        }

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if tx.lock_account(user_id).await?.is_some() {
            return Err(LedgerError::AlreadyEnrolled(user_id));
        }

        // An imported set is authoritative; a referrer must agree with it.
        let ancestors = match (tx.lock_referrals(user_id).await?, referred_by) {
            (Some(recorded), None) => recorded,
            (Some(recorded), Some(referrer_id)) => {
                if recorded.at(ReferralLevel::DIRECT) != Some(referrer_id) {
                    return Err(LedgerError::AlreadyEnrolled(user_id));
                }
                recorded
            }
            (None, Some(referrer_id)) => {
                let upline = self.store.ancestors(referrer_id).await?;
                let ancestors = Ancestors::under(referrer_id, &upline);
                if ancestors.contains(user_id) {
                    return Err(LedgerError::InvalidReferral(format!(
                        "user {user_id} cannot be their own ancestor"
                    )));
                }
                tx.stage_referrals(user_id, ancestors.clone());
                ancestors
            }
            (None, None) => Ancestors::none(),
        };

        let account = Account::open(user_id, now);
        tx.stage_account(account.clone());
        tx.stage_audit(AuditEntry::new(
            user_id,
            None,
            AuditAction::UserEnrolled,
            json!({
                "referred_by": referred_by,
                "ancestors": ancestors.len(),
            }),
            now,
        ));
        tx.commit().await?;

        info!(%user_id, ancestors = ancestors.len(), "user enrolled");
        Ok(account)
    }

    /// Current committed balance of `user_id`.
    pub async fn balance(&self, user_id: UserId) -> Result<Decimal> {
        self.store
            .account(user_id)
            .await?
            .map(|account| account.balance.value())
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    pub async fn deposit(&self, deposit_id: DepositId) -> Result<Deposit> {
        self.store
            .deposit(deposit_id)
            .await?
            .ok_or(LedgerError::DepositNotFound(deposit_id))
    }

    pub async fn withdrawal(&self, withdrawal_id: WithdrawalId) -> Result<Withdrawal> {
        self.store
            .withdrawal(withdrawal_id)
            .await?
            .ok_or(LedgerError::WithdrawalNotFound(withdrawal_id))
    }

    /// Commissions caused by one deposit, ascending by level.
    pub async fn commissions_for_deposit(&self, deposit_id: DepositId) -> Result<Vec<Commission>> {
        let mut commissions = self.store.commissions_for_deposit(deposit_id).await?;
        commissions.sort_by_key(|c| c.level);
        Ok(commissions)
    }

    pub async fn commissions_earned_by(&self, referrer_id: UserId) -> Result<Vec<Commission>> {
        let mut commissions = self.store.commissions_for_referrer(referrer_id).await?;
        commissions.sort_by_key(|c| c.created_at);
        Ok(commissions)
    }

    /// Audit entries about `user_id`, oldest first.
    pub async fn audit_trail(&self, user_id: UserId) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .store
            .audit_log()
            .await?
            .into_iter()
            .filter(|entry| entry.user_id == user_id)
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }

    /// Referred users and commission earned by `referrer_id`, per level 1..=5.
    pub async fn referral_summary(&self, referrer_id: UserId) -> Result<Vec<LevelSummary>> {
        let counts = self.store.referral_counts(referrer_id).await?;

        let mut totals: BTreeMap<ReferralLevel, Decimal> = BTreeMap::new();
        for commission in self.store.commissions_for_referrer(referrer_id).await? {
            *totals.entry(commission.level).or_default() += commission.commission_amount;
        }

        Ok(ReferralLevel::all()
            .map(|level| LevelSummary {
                level,
                rate: self.cascade.rates().rate_for(level),
                referred_users: counts.get(&level).copied().unwrap_or(0),
                commission_total: totals.get(&level).copied().unwrap_or_default(),
            })
            .collect())
    }

    /// Loads precomputed referral edges and records one ancestor set per
    /// referred user, all in one unit of work.
    ///
    /// Nothing is recorded unless every set is well formed, no listed user
    /// already has a set, and the combined sets keep cascade lock order
    /// acyclic. Returns the number of users recorded.
    #[instrument(skip_all)]
    pub async fn import_referrals<R: Read>(&self, reader: ReferralEdgeReader<R>) -> Result<usize> {
        let mut edges: BTreeMap<UserId, Vec<ReferralEdge>> = BTreeMap::new();
        for edge in reader.edges() {
            let edge = edge?;
            edges.entry(edge.referred_id).or_default().push(edge);
        }

        let sets = edges
            .iter()
            .map(|(user_id, edges)| Ok((*user_id, Ancestors::from_edges(*user_id, edges)?)))
            .collect::<Result<Vec<_>>>()?;

        // Ascending user id, so concurrent imports lock in one order.
        let mut tx = self.store.begin().await?;
        for (user_id, _) in &sets {
            if tx.lock_referrals(*user_id).await?.is_some() {
                warn!(%user_id, "import names a user with recorded referrals");
                return Err(LedgerError::AlreadyEnrolled(*user_id));
            }
        }

        let stored = self.store.ancestor_sets().await?;
        referral::ensure_acyclic(
            stored
                .iter()
                .chain(sets.iter())
                .map(|(user_id, ancestors)| (*user_id, ancestors)),
        )?;

        for (user_id, ancestors) in &sets {
            tx.stage_referrals(*user_id, ancestors.clone());
        }
        tx.commit().await?;

        info!(users = sets.len(), "referral edges imported");
        Ok(sets.len())
    }
}

/// Applies a signed balance delta to `user_id` inside `tx`.
///
/// Never refuses a negative result; debits that must not overdraw check
/// sufficiency on the locked row first.
pub(crate) async fn adjust(
    tx: &mut dyn LedgerTransaction,
    user_id: UserId,
    delta: Decimal,
    at: DateTime<Utc>,
) -> Result<Account> {
    let mut account = tx
        .lock_account(user_id)
        .await?
        .ok_or(LedgerError::AccountNotFound(user_id))?;
    account.adjust(delta, at);
    tx.stage_account(account.clone());
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::LedgerStore;
    use crate::error::ErrorCategory;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use crate::infrastructure::proof::PrevalidatedProofs;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    fn ledger() -> Ledger {
        Ledger::new(
            LedgerConfig::default(),
            Box::new(InMemoryLedgerStore::default()),
            Box::new(PrevalidatedProofs),
        )
    }

    #[tokio::test]
    async fn test_enroll_builds_ancestor_chain() {
        let ledger = ledger();
        let root = UserId::new();
        let mid = UserId::new();
        let leaf = UserId::new();

        ledger.enroll_user(root, None).await.unwrap();
        ledger.enroll_user(mid, Some(root)).await.unwrap();
        ledger.enroll_user(leaf, Some(mid)).await.unwrap();

        let ancestors = ledger.store.ancestors(leaf).await.unwrap();
        assert_eq!(ancestors.at(ReferralLevel::new(1).unwrap()), Some(mid));
        assert_eq!(ancestors.at(ReferralLevel::new(2).unwrap()), Some(root));
        assert_eq!(ledger.balance(leaf).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_enroll_truncates_at_five_levels() {
        let ledger = ledger();
        let mut previous = UserId::new();
        ledger.enroll_user(previous, None).await.unwrap();
        for _ in 0..6 {
            let user = UserId::new();
            ledger.enroll_user(user, Some(previous)).await.unwrap();
            previous = user;
        }

        let ancestors = ledger.store.ancestors(previous).await.unwrap();
        assert_eq!(ancestors.len(), 5);
    }

    #[tokio::test]
    async fn test_enroll_rejects_duplicates_and_unknown_referrer() {
        let ledger = ledger();
        let user = UserId::new();
        ledger.enroll_user(user, None).await.unwrap();

        assert!(matches!(
            ledger.enroll_user(user, None).await,
            Err(LedgerError::AlreadyEnrolled(_))
        ));
        assert!(matches!(
            ledger.enroll_user(UserId::new(), Some(UserId::new())).await,
            Err(LedgerError::UnknownReferrer(_))
        ));
    }

    #[tokio::test]
    async fn test_adjust_requires_account() {
        let store = InMemoryLedgerStore::default();
        let mut tx = store.begin().await.unwrap();
        let result = adjust(tx.as_mut(), UserId::new(), dec!(1), Utc::now()).await;
        assert!(matches!(result, Err(LedgerError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_lookups_are_not_found() {
        let ledger = ledger();
        assert!(matches!(
            ledger.balance(UserId::new()).await,
            Err(LedgerError::AccountNotFound(_))
        ));
        assert!(matches!(
            ledger.deposit(DepositId::new()).await,
            Err(LedgerError::DepositNotFound(_))
        ));
        assert!(matches!(
            ledger.withdrawal(WithdrawalId::new()).await,
            Err(LedgerError::WithdrawalNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_import_referrals() {
        let ledger = ledger();
        let (r1, r2, user) = (UserId::new(), UserId::new(), UserId::new());
        let data = format!("referrer,referred,level\n{r1},{user},1\n{r2},{user},2\n{r2},{r1},1\n");

        let imported = ledger
            .import_referrals(ReferralEdgeReader::new(Cursor::new(data)))
            .await
            .unwrap();
        assert_eq!(imported, 2);

        let ancestors = ledger.store.ancestors(user).await.unwrap();
        assert_eq!(ancestors.len(), 2);
        assert_eq!(ancestors.at(ReferralLevel::new(2).unwrap()), Some(r2));
    }

    #[tokio::test]
    async fn test_import_rejects_duplicate_level_before_recording() {
        let ledger = ledger();
        let (r1, r2, user, other) = (UserId::new(), UserId::new(), UserId::new(), UserId::new());
        let data = format!("referrer,referred,level\n{r1},{other},1\n{r1},{user},1\n{r2},{user},1\n");

        let err = ledger
            .import_referrals(ReferralEdgeReader::new(Cursor::new(data)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidReferral(_)));
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(!err.is_retryable());
        assert!(ledger.store.ancestors(other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_over_existing_enrollment_records_nothing() {
        let ledger = ledger();
        let (referrer, enrolled) = (UserId::new(), UserId::new());
        ledger.enroll_user(referrer, None).await.unwrap();
        ledger.enroll_user(enrolled, Some(referrer)).await.unwrap();

        // `fresh` sorts either side of `enrolled`; neither may be recorded.
        let (fresh_a, fresh_b) = (UserId::new(), UserId::new());
        let data = format!(
            "referrer,referred,level\n{referrer},{fresh_a},1\n{referrer},{enrolled},1\n{referrer},{fresh_b},1\n"
        );
        let result = ledger
            .import_referrals(ReferralEdgeReader::new(Cursor::new(data)))
            .await;
        assert!(matches!(result, Err(LedgerError::AlreadyEnrolled(user)) if user == enrolled));

        assert!(ledger.store.ancestors(fresh_a).await.unwrap().is_empty());
        assert!(ledger.store.ancestors(fresh_b).await.unwrap().is_empty());
        assert_eq!(ledger.store.ancestor_sets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enroll_keeps_imported_ancestors() {
        let ledger = ledger();
        let (r1, r2, user) = (UserId::new(), UserId::new(), UserId::new());
        ledger.enroll_user(r1, None).await.unwrap();
        let data = format!("referrer,referred,level\n{r1},{user},1\n{r2},{user},2\n");
        ledger
            .import_referrals(ReferralEdgeReader::new(Cursor::new(data)))
            .await
            .unwrap();

        assert!(matches!(
            ledger.enroll_user(user, Some(UserId::new())).await,
            Err(LedgerError::UnknownReferrer(_))
        ));
        let other = UserId::new();
        ledger.enroll_user(other, None).await.unwrap();
        assert!(matches!(
            ledger.enroll_user(user, Some(other)).await,
            Err(LedgerError::AlreadyEnrolled(_))
        ));

        ledger.enroll_user(user, Some(r1)).await.unwrap();
        let ancestors = ledger.store.ancestors(user).await.unwrap();
        assert_eq!(ancestors.at(ReferralLevel::new(2).unwrap()), Some(r2));
    }

    #[tokio::test]
    async fn test_enroll_rejects_own_upline() {
        let ledger = ledger();
        let (user, referrer) = (UserId::new(), UserId::new());
        let data = format!("referrer,referred,level\n{user},{referrer},1\n");
        ledger
            .import_referrals(ReferralEdgeReader::new(Cursor::new(data)))
            .await
            .unwrap();
        ledger.enroll_user(referrer, None).await.unwrap();

        let err = ledger.enroll_user(user, Some(referrer)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidReferral(_)));
        assert!(!err.is_retryable());
        assert!(matches!(
            ledger.balance(user).await,
            Err(LedgerError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_import_rejects_cycles() {
        let ledger = ledger();
        let (a, b) = (UserId::new(), UserId::new());
        let data = format!("referrer,referred,level\n{a},{b},1\n{b},{a},1\n");

        let err = ledger
            .import_referrals(ReferralEdgeReader::new(Cursor::new(data)))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(ledger.store.ancestor_sets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_rejects_cycle_through_stored_sets() {
        let ledger = ledger();
        let (root, child) = (UserId::new(), UserId::new());
        ledger.enroll_user(root, None).await.unwrap();
        ledger.enroll_user(child, Some(root)).await.unwrap();

        // root below child would let a cascade lock child before root.
        let data = format!("referrer,referred,level\n{child},{root},1\n");
        assert!(matches!(
            ledger
                .import_referrals(ReferralEdgeReader::new(Cursor::new(data)))
                .await,
            Err(LedgerError::InvalidReferral(_))
        ));
        assert!(ledger.store.ancestors(root).await.unwrap().is_empty());
    }
}
