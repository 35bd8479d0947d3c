use super::account::Account;
use super::audit::AuditEntry;
use super::commission::Commission;
use super::deposit::Deposit;
use super::ids::{DepositId, UserId, WithdrawalId};
use super::proof::ProofReference;
use super::referral::{Ancestors, ReferralLevel};
use super::withdrawal::Withdrawal;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Durable home of accounts, requests, commissions, referral ancestor sets
/// and the audit log.
///
/// Plain reads see committed state only. Every mutation goes through a
/// [`LedgerTransaction`] obtained from [`LedgerStore::begin`].
#[async_trait]
pub trait LedgerStore: ReferralGraph + Send + Sync {
    async fn begin(&self) -> Result<LedgerTransactionBox>;

    async fn account(&self, user_id: UserId) -> Result<Option<Account>>;
    async fn deposit(&self, deposit_id: DepositId) -> Result<Option<Deposit>>;
    async fn withdrawal(&self, withdrawal_id: WithdrawalId) -> Result<Option<Withdrawal>>;
    async fn commissions_for_deposit(&self, deposit_id: DepositId) -> Result<Vec<Commission>>;
    async fn commissions_for_referrer(&self, referrer_id: UserId) -> Result<Vec<Commission>>;
    async fn audit_log(&self) -> Result<Vec<AuditEntry>>;
}

/// One atomic unit of work.
///
/// `lock_*` takes an exclusive row lock held until commit or drop, and reads
/// the row as this transaction sees it. `stage_*` buffers writes. Dropping
/// the transaction without calling [`commit`](Self::commit) discards every
/// staged write.
#[async_trait]
pub trait LedgerTransaction: Send {
    async fn lock_account(&mut self, user_id: UserId) -> Result<Option<Account>>;
    async fn lock_deposit(&mut self, deposit_id: DepositId) -> Result<Option<Deposit>>;
    async fn lock_withdrawal(&mut self, withdrawal_id: WithdrawalId) -> Result<Option<Withdrawal>>;
    /// Locks the user's ancestor set; `None` when none was recorded yet.
    async fn lock_referrals(&mut self, user_id: UserId) -> Result<Option<Ancestors>>;

    fn stage_account(&mut self, account: Account);
    fn stage_deposit(&mut self, deposit: Deposit);
    fn stage_withdrawal(&mut self, withdrawal: Withdrawal);
    fn stage_commission(&mut self, commission: Commission);
    fn stage_audit(&mut self, entry: AuditEntry);
    fn stage_referrals(&mut self, user_id: UserId, ancestors: Ancestors);

    /// Applies all staged writes at once, then releases the row locks.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Read-only view of who referred whom.
///
/// Ancestor sets are written once, through a [`LedgerTransaction`], and
/// never changed.
#[async_trait]
pub trait ReferralGraph: Send + Sync {
    /// Ancestors of `user_id`; empty when the user was not referred.
    async fn ancestors(&self, user_id: UserId) -> Result<Ancestors>;

    /// Every recorded ancestor set.
    async fn ancestor_sets(&self) -> Result<Vec<(UserId, Ancestors)>>;

    /// Number of users that have `referrer_id` as ancestor, per level.
    async fn referral_counts(&self, referrer_id: UserId) -> Result<BTreeMap<ReferralLevel, usize>>;
}

/// Confirms that a proof reference points at acceptable evidence.
#[async_trait]
pub trait ProofVerifier: Send + Sync {
    async fn verify(&self, owner_id: UserId, proof: &ProofReference) -> Result<()>;
}

pub type LedgerStoreBox = Box<dyn LedgerStore>;
pub type LedgerTransactionBox = Box<dyn LedgerTransaction>;
pub type ProofVerifierBox = Box<dyn ProofVerifier>;
