use super::unit_of_work::{HeldLocks, RowKey, RowLocks, WriteSet};
use crate::config::LedgerConfig;
use crate::domain::account::Account;
use crate::domain::audit::AuditEntry;
use crate::domain::commission::Commission;
use crate::domain::deposit::Deposit;
use crate::domain::ids::{DepositId, UserId, WithdrawalId};
use crate::domain::ports::{LedgerStore, LedgerTransaction, LedgerTransactionBox, ReferralGraph};
use crate::domain::referral::{Ancestors, ReferralLevel};
use crate::domain::withdrawal::Withdrawal;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<UserId, Account>,
    deposits: HashMap<DepositId, Deposit>,
    withdrawals: HashMap<WithdrawalId, Withdrawal>,
    commissions: Vec<Commission>,
    audit: Vec<AuditEntry>,
    referrals: HashMap<UserId, Ancestors>,
}

/// A thread-safe in-memory ledger store and referral graph.
///
/// Committed rows live behind one `Arc<RwLock<..>>`; transactions serialize
/// on per-row locks and publish their write set under a single write guard,
/// so readers never observe half a commit. `Clone` shares the same tables.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
    locks: RowLocks,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

impl InMemoryLedgerStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            locks: RowLocks::new(lock_timeout),
        }
    }

    /// Store whose row locks wait at most `config.lock_timeout_ms`.
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.lock_timeout())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<LedgerTransactionBox> {
        Ok(Box::new(InMemoryTransaction {
            tables: Arc::clone(&self.tables),
            locks: self.locks.clone(),
            held: HeldLocks::default(),
            staged: WriteSet::default(),
        }))
    }

    async fn account(&self, user_id: UserId) -> Result<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.get(&user_id).cloned())
    }

    async fn deposit(&self, deposit_id: DepositId) -> Result<Option<Deposit>> {
        let tables = self.tables.read().await;
        Ok(tables.deposits.get(&deposit_id).cloned())
    }

    async fn withdrawal(&self, withdrawal_id: WithdrawalId) -> Result<Option<Withdrawal>> {
        let tables = self.tables.read().await;
        Ok(tables.withdrawals.get(&withdrawal_id).cloned())
    }

    async fn commissions_for_deposit(&self, deposit_id: DepositId) -> Result<Vec<Commission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .commissions
            .iter()
            .filter(|c| c.deposit_id == deposit_id)
            .cloned()
            .collect())
    }

    async fn commissions_for_referrer(&self, referrer_id: UserId) -> Result<Vec<Commission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .commissions
            .iter()
            .filter(|c| c.referrer_id == referrer_id)
            .cloned()
            .collect())
    }

    async fn audit_log(&self) -> Result<Vec<AuditEntry>> {
        let tables = self.tables.read().await;
        Ok(tables.audit.clone())
    }
}

/// Unit of work over [`InMemoryLedgerStore`].
pub struct InMemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    locks: RowLocks,
    held: HeldLocks,
    staged: WriteSet,
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lock_account(&mut self, user_id: UserId) -> Result<Option<Account>> {
        self.held
            .lock(&self.locks, RowKey::Account(user_id))
            .await?;
        if let Some(account) = self.staged.accounts.get(&user_id) {
            return Ok(Some(account.clone()));
        }
        let tables = self.tables.read().await;
        Ok(tables.accounts.get(&user_id).cloned())
    }

    async fn lock_deposit(&mut self, deposit_id: DepositId) -> Result<Option<Deposit>> {
        self.held
            .lock(&self.locks, RowKey::Deposit(deposit_id))
            .await?;
        if let Some(deposit) = self.staged.deposits.get(&deposit_id) {
            return Ok(Some(deposit.clone()));
        }
        let tables = self.tables.read().await;
        Ok(tables.deposits.get(&deposit_id).cloned())
    }

    async fn lock_withdrawal(&mut self, withdrawal_id: WithdrawalId) -> Result<Option<Withdrawal>> {
        self.held
            .lock(&self.locks, RowKey::Withdrawal(withdrawal_id))
            .await?;
        if let Some(withdrawal) = self.staged.withdrawals.get(&withdrawal_id) {
            return Ok(Some(withdrawal.clone()));
        }
        let tables = self.tables.read().await;
        Ok(tables.withdrawals.get(&withdrawal_id).cloned())
    }

    async fn lock_referrals(&mut self, user_id: UserId) -> Result<Option<Ancestors>> {
        self.held
            .lock(&self.locks, RowKey::Referrals(user_id))
            .await?;
        if let Some(ancestors) = self.staged.referrals.get(&user_id) {
            return Ok(Some(ancestors.clone()));
        }
        let tables = self.tables.read().await;
        Ok(tables.referrals.get(&user_id).cloned())
    }

    fn stage_account(&mut self, account: Account) {
        self.staged.accounts.insert(account.user_id, account);
    }

    fn stage_deposit(&mut self, deposit: Deposit) {
        self.staged.deposits.insert(deposit.id, deposit);
    }

    fn stage_withdrawal(&mut self, withdrawal: Withdrawal) {
        self.staged.withdrawals.insert(withdrawal.id, withdrawal);
    }

    fn stage_commission(&mut self, commission: Commission) {
        self.staged.commissions.push(commission);
    }

    fn stage_audit(&mut self, entry: AuditEntry) {
        self.staged.audit.push(entry);
    }

    fn stage_referrals(&mut self, user_id: UserId, ancestors: Ancestors) {
        self.staged.referrals.insert(user_id, ancestors);
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTransaction {
            tables,
            held,
            staged,
            ..
        } = *self;

        if !staged.is_empty() {
            let mut tables = tables.write().await;
            tables.accounts.extend(staged.accounts);
            tables.deposits.extend(staged.deposits);
            tables.withdrawals.extend(staged.withdrawals);
            tables.commissions.extend(staged.commissions);
            tables.audit.extend(staged.audit);
            tables.referrals.extend(staged.referrals);
        }

        // Row locks are released only once the writes are visible.
        drop(held);
        Ok(())
    }
}

#[async_trait]
impl ReferralGraph for InMemoryLedgerStore {
    async fn ancestors(&self, user_id: UserId) -> Result<Ancestors> {
        let tables = self.tables.read().await;
        Ok(tables.referrals.get(&user_id).cloned().unwrap_or_default())
    }

    async fn ancestor_sets(&self) -> Result<Vec<(UserId, Ancestors)>> {
        let tables = self.tables.read().await;
        Ok(tables
            .referrals
            .iter()
            .map(|(user_id, ancestors)| (*user_id, ancestors.clone()))
            .collect())
    }

    async fn referral_counts(&self, referrer_id: UserId) -> Result<BTreeMap<ReferralLevel, usize>> {
        let tables = self.tables.read().await;
        let mut counts = BTreeMap::new();
        for set in tables.referrals.values() {
            for (level, ancestor) in set.iter() {
                if ancestor == referrer_id {
                    *counts.entry(level).or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }
}
