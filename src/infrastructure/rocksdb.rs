use super::unit_of_work::{HeldLocks, RowKey, RowLocks, WriteSet};
use crate::domain::account::Account;
use crate::domain::audit::AuditEntry;
use crate::domain::commission::Commission;
use crate::domain::deposit::Deposit;
use crate::domain::ids::{DepositId, UserId, WithdrawalId};
use crate::domain::ports::{LedgerStore, LedgerTransaction, LedgerTransactionBox, ReferralGraph};
use crate::domain::referral::{Ancestors, ReferralLevel};
use crate::domain::withdrawal::Withdrawal;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Column Family for account balances.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for deposit requests.
pub const CF_DEPOSITS: &str = "deposits";
/// Column Family for withdrawal requests.
pub const CF_WITHDRAWALS: &str = "withdrawals";
/// Column Family for commissions, keyed by deposit id + level.
pub const CF_COMMISSIONS: &str = "commissions";
/// Column Family for the audit log, keyed by time-ordered audit id.
pub const CF_AUDIT: &str = "audit";
/// Column Family for precomputed referral ancestor sets.
pub const CF_REFERRALS: &str = "referrals";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_ACCOUNTS,
    CF_DEPOSITS,
    CF_WITHDRAWALS,
    CF_COMMISSIONS,
    CF_AUDIT,
    CF_REFERRALS,
];

/// A persistent ledger store and referral graph backed by RocksDB.
///
/// Each record type lives in its own Column Family. A transaction's write
/// set is committed as a single `WriteBatch`, which RocksDB applies
/// atomically, so a crash mid-commit leaves either all or none of it.
///
/// Cloning shares the underlying `Arc<DB>` and lock table.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    locks: RowLocks,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column families.
    pub fn open<P: AsRef<Path>>(path: P, lock_timeout: Duration) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            locks: RowLocks::new(lock_timeout),
        })
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        read_row(&self.db, cf_name, key)
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = column_family(&self.db, cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }
}

fn column_family<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| LedgerError::Storage(format!("{name} column family not found")))
}

fn read_row<T: DeserializeOwned>(db: &DB, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
    let cf = column_family(db, cf_name)?;
    match db.get_cf(&cf, key)? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn commission_key(commission: &Commission) -> Vec<u8> {
    let mut key = commission.deposit_id.as_key().to_vec();
    key.push(commission.level.get());
    key
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn begin(&self) -> Result<LedgerTransactionBox> {
        Ok(Box::new(RocksDBTransaction {
            db: Arc::clone(&self.db),
            locks: self.locks.clone(),
            held: HeldLocks::default(),
            staged: WriteSet::default(),
        }))
    }

    async fn account(&self, user_id: UserId) -> Result<Option<Account>> {
        self.get(CF_ACCOUNTS, &user_id.as_key())
    }

    async fn deposit(&self, deposit_id: DepositId) -> Result<Option<Deposit>> {
        self.get(CF_DEPOSITS, &deposit_id.as_key())
    }

    async fn withdrawal(&self, withdrawal_id: WithdrawalId) -> Result<Option<Withdrawal>> {
        self.get(CF_WITHDRAWALS, &withdrawal_id.as_key())
    }

    async fn commissions_for_deposit(&self, deposit_id: DepositId) -> Result<Vec<Commission>> {
        let cf = column_family(&self.db, CF_COMMISSIONS)?;
        let prefix = deposit_id.as_key();
        let mut commissions = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix[..], Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix[..]) {
                break;
            }
            commissions.push(decode(&value)?);
        }
        Ok(commissions)
    }

    async fn commissions_for_referrer(&self, referrer_id: UserId) -> Result<Vec<Commission>> {
        let all: Vec<Commission> = self.scan(CF_COMMISSIONS)?;
        Ok(all
            .into_iter()
            .filter(|c| c.referrer_id == referrer_id)
            .collect())
    }

    async fn audit_log(&self) -> Result<Vec<AuditEntry>> {
        self.scan(CF_AUDIT)
    }
}

/// Unit of work over [`RocksDBStore`].
pub struct RocksDBTransaction {
    db: Arc<DB>,
    locks: RowLocks,
    held: HeldLocks,
    staged: WriteSet,
}

#[async_trait]
impl LedgerTransaction for RocksDBTransaction {
    async fn lock_account(&mut self, user_id: UserId) -> Result<Option<Account>> {
        self.held
            .lock(&self.locks, RowKey::Account(user_id))
            .await?;
        match self.staged.accounts.get(&user_id) {
            Some(account) => Ok(Some(account.clone())),
            None => read_row(&self.db, CF_ACCOUNTS, &user_id.as_key()),
        }
    }

    async fn lock_deposit(&mut self, deposit_id: DepositId) -> Result<Option<Deposit>> {
        self.held
            .lock(&self.locks, RowKey::Deposit(deposit_id))
            .await?;
        match self.staged.deposits.get(&deposit_id) {
            Some(deposit) => Ok(Some(deposit.clone())),
            None => read_row(&self.db, CF_DEPOSITS, &deposit_id.as_key()),
        }
    }

    async fn lock_withdrawal(&mut self, withdrawal_id: WithdrawalId) -> Result<Option<Withdrawal>> {
        self.held
            .lock(&self.locks, RowKey::Withdrawal(withdrawal_id))
            .await?;
        match self.staged.withdrawals.get(&withdrawal_id) {
            Some(withdrawal) => Ok(Some(withdrawal.clone())),
            None => read_row(&self.db, CF_WITHDRAWALS, &withdrawal_id.as_key()),
        }
    }

    async fn lock_referrals(&mut self, user_id: UserId) -> Result<Option<Ancestors>> {
        self.held
            .lock(&self.locks, RowKey::Referrals(user_id))
            .await?;
        match self.staged.referrals.get(&user_id) {
            Some(ancestors) => Ok(Some(ancestors.clone())),
            None => read_row(&self.db, CF_REFERRALS, &user_id.as_key()),
        }
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
        let RocksDBTransaction {
            db, held, staged, ..
        } = *self;

        if !staged.is_empty() {
            let mut batch = WriteBatch::default();

            let cf = column_family(&db, CF_ACCOUNTS)?;
            for account in staged.accounts.values() {
                batch.put_cf(cf, account.user_id.as_key(), encode(account)?);
            }
            let cf = column_family(&db, CF_DEPOSITS)?;
            for deposit in staged.deposits.values() {
                batch.put_cf(cf, deposit.id.as_key(), encode(deposit)?);
            }
            let cf = column_family(&db, CF_WITHDRAWALS)?;
            for withdrawal in staged.withdrawals.values() {
                batch.put_cf(cf, withdrawal.id.as_key(), encode(withdrawal)?);
            }
            let cf = column_family(&db, CF_COMMISSIONS)?;
            for commission in &staged.commissions {
                batch.put_cf(cf, commission_key(commission), encode(commission)?);
            }
            let cf = column_family(&db, CF_AUDIT)?;
            for entry in &staged.audit {
                batch.put_cf(cf, entry.id.as_key(), encode(entry)?);
            }
            let cf = column_family(&db, CF_REFERRALS)?;
            for (user_id, ancestors) in &staged.referrals {
                batch.put_cf(cf, user_id.as_key(), encode(ancestors)?);
            }

            db.write(batch)?;
        }

        drop(held);
        Ok(())
    }
}

#[async_trait]
impl ReferralGraph for RocksDBStore {
    async fn ancestors(&self, user_id: UserId) -> Result<Ancestors> {
        Ok(self
            .get(CF_REFERRALS, &user_id.as_key())?
            .unwrap_or_default())
    }

    async fn ancestor_sets(&self) -> Result<Vec<(UserId, Ancestors)>> {
        let cf = column_family(&self.db, CF_REFERRALS)?;
        let mut sets = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let bytes = <[u8; 16]>::try_from(&key[..]).map_err(|_| {
                LedgerError::Storage(format!("malformed referral key of {} bytes", key.len()))
            })?;
            sets.push((UserId::from_uuid(Uuid::from_bytes(bytes)), decode(&value)?));
        }
        Ok(sets)
    }

    async fn referral_counts(&self, referrer_id: UserId) -> Result<BTreeMap<ReferralLevel, usize>> {
        let sets: Vec<Ancestors> = self.scan(CF_REFERRALS)?;
        let mut counts = BTreeMap::new();
        for set in &sets {
            for (level, ancestor) in set.iter() {
                if ancestor == referrer_id {
                    *counts.entry(level).or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Balance;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn open(path: &Path) -> RocksDBStore {
        RocksDBStore::open(path, Duration::from_millis(100)).expect("Failed to open RocksDB")
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some(), "{name} missing");
        }
    }

    #[tokio::test]
    async fn test_rocksdb_commit_and_rollback() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let user = UserId::new();

        let mut account = Account::open(user, Utc::now());
        account.adjust(dec!(100.0), Utc::now());

        {
            let mut tx = store.begin().await.unwrap();
            tx.lock_account(user).await.unwrap();
            tx.stage_account(account.clone());
        }
        assert!(store.account(user).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        tx.lock_account(user).await.unwrap();
        tx.stage_account(account.clone());
        tx.commit().await.unwrap();

        let retrieved = store.account(user).await.unwrap().unwrap();
        assert_eq!(retrieved.balance, Balance::new(dec!(100.0)));
    }

    #[tokio::test]
    async fn test_rocksdb_survives_reopen() {
        let dir = tempdir().unwrap();
        let user = UserId::new();
        let referrer = UserId::new();

        {
            let store = open(dir.path());
            let mut tx = store.begin().await.unwrap();
            tx.lock_account(user).await.unwrap();
            tx.lock_referrals(user).await.unwrap();
            tx.stage_account(Account::open(user, Utc::now()));
            tx.stage_referrals(user, Ancestors::under(referrer, &Ancestors::none()));
            tx.commit().await.unwrap();
        }

        let store = open(dir.path());
        assert!(store.account(user).await.unwrap().is_some());
        let ancestors = store.ancestors(user).await.unwrap();
        assert_eq!(ancestors.at(ReferralLevel::new(1).unwrap()), Some(referrer));

        let sets = store.ancestor_sets().await.unwrap();
        assert_eq!(sets, vec![(user, ancestors.clone())]);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.lock_referrals(user).await.unwrap(), Some(ancestors));
    }
}
