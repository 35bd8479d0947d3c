//! Row locking and write buffering shared by every store backend.
//!
//! A transaction takes exclusive per-row locks as it reads, buffers its
//! writes in a [`WriteSet`], and applies the set in one step on commit. Locks
//! are released when the transaction is committed or dropped.

use crate::domain::account::Account;
use crate::domain::audit::AuditEntry;
use crate::domain::commission::Commission;
use crate::domain::deposit::Deposit;
use crate::domain::ids::{DepositId, UserId, WithdrawalId};
use crate::domain::referral::Ancestors;
use crate::domain::withdrawal::Withdrawal;
use crate::error::{LedgerError, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A lockable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKey {
    Account(UserId),
    Deposit(DepositId),
    Withdrawal(WithdrawalId),
    Referrals(UserId),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(id) => write!(f, "account {id}"),
            Self::Deposit(id) => write!(f, "deposit {id}"),
            Self::Withdrawal(id) => write!(f, "withdrawal {id}"),
            Self::Referrals(id) => write!(f, "referrals of {id}"),
        }
    }
}

type RowTable = DashMap<RowKey, Arc<Mutex<()>>>;

/// Table of exclusive row locks, shared by all transactions of one store.
///
/// An entry exists only while some transaction holds or awaits the row.
#[derive(Clone)]
pub struct RowLocks {
    rows: Arc<RowTable>,
    timeout: Duration,
}

impl RowLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Waits for the row's lock, failing with `LockTimeout` after the
    /// configured wait.
    pub async fn acquire(&self, key: RowKey) -> Result<RowGuard> {
        // Clone the Arc out so the shard guard is not held across the await.
        let row = self.rows.entry(key).or_default().clone();
        let locked = tokio::time::timeout(self.timeout, row.lock_owned()).await;
        match locked {
            Ok(guard) => Ok(RowGuard {
                key,
                rows: Arc::clone(&self.rows),
                guard: Some(guard),
            }),
            Err(_) => {
                evict_idle(&self.rows, key);
                Err(LedgerError::LockTimeout(key.to_string()))
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Removes the row's mutex once only the table still references it.
///
/// The shard write lock taken by `remove_if` orders this against `acquire`,
/// so a waiter either cloned the mutex first or creates a fresh one.
fn evict_idle(rows: &RowTable, key: RowKey) {
    rows.remove_if(&key, |_, row| Arc::strong_count(row) == 1);
}

/// An acquired row lock; releasing it evicts the idle table entry.
pub struct RowGuard {
    key: RowKey,
    rows: Arc<RowTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        evict_idle(&self.rows, self.key);
    }
}

/// Row locks held by one transaction.
#[derive(Default)]
pub struct HeldLocks {
    guards: HashMap<RowKey, RowGuard>,
}

impl HeldLocks {
    /// Locks `key` unless this transaction already holds it.
    pub async fn lock(&mut self, locks: &RowLocks, key: RowKey) -> Result<()> {
        if !self.guards.contains_key(&key) {
            let guard = locks.acquire(key).await?;
            self.guards.insert(key, guard);
        }
        Ok(())
    }
}

/// Writes buffered by one transaction.
#[derive(Debug, Default)]
pub struct WriteSet {
    pub accounts: HashMap<UserId, Account>,
    pub deposits: HashMap<DepositId, Deposit>,
    pub withdrawals: HashMap<WithdrawalId, Withdrawal>,
    pub commissions: Vec<Commission>,
    pub audit: Vec<AuditEntry>,
    pub referrals: HashMap<UserId, Ancestors>,
}

impl WriteSet {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.deposits.is_empty()
            && self.withdrawals.is_empty()
            && self.commissions.is_empty()
            && self.audit.is_empty()
            && self.referrals.is_empty()
    }
}
