#![allow(dead_code)]

use referral_ledger::application::Ledger;
use referral_ledger::config::LedgerConfig;
use referral_ledger::domain::caller::Caller;
use referral_ledger::domain::deposit::Decision;
use referral_ledger::domain::ids::UserId;
use referral_ledger::domain::ports::LedgerStoreBox;
use referral_ledger::domain::proof::ProofReference;
use referral_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use referral_ledger::infrastructure::proof::PrevalidatedProofs;
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

/// Routes ledger events to the test harness; set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ledger() -> Ledger {
    let config = LedgerConfig::default();
    ledger_on(Box::new(InMemoryLedgerStore::from_config(&config)))
}

pub fn ledger_on(store: LedgerStoreBox) -> Ledger {
    init_tracing();
    Ledger::new(LedgerConfig::default(), store, Box::new(PrevalidatedProofs))
}

pub fn admin() -> Caller {
    Caller::admin(UserId::new())
}

pub fn proof() -> ProofReference {
    ProofReference::new("uploads/receipt.png").unwrap()
}

/// Enrolls a referral chain and returns it root first: the last user is
/// the deepest, with every earlier user among its ancestors.
pub async fn enroll_chain(ledger: &Ledger, len: usize) -> Vec<UserId> {
    let mut chain: Vec<UserId> = Vec::with_capacity(len);
    for _ in 0..len {
        let user = UserId::new();
        ledger.enroll_user(user, chain.last().copied()).await.unwrap();
        chain.push(user);
    }
    chain
}

/// Credits `amount` to `user` through an approved deposit.
pub async fn fund(ledger: &Ledger, user: UserId, amount: Decimal) {
    let deposit = ledger.submit_deposit(user, amount, proof()).await.unwrap();
    ledger
        .resolve_deposit(&admin(), deposit.id, Decision::Approve, None)
        .await
        .unwrap();
}
