//! Transaction store persistence, tracking and retry against the ledger model.

mod common;

use alloy::primitives::{Address, U256};
use std::sync::Arc;

use common::*;
use x402_payroll::config::TransactionConfig;
use x402_payroll::ledger::{LedgerCall, ManualClock, PayrollLedger, PAY_PERIOD_SECS};
use x402_payroll::transactions::{
    LedgerResubmitter, NewTransaction, TransactionPatch, TransactionStatus, TransactionStore, TransactionType,
};

fn persistent_config(path: &std::path::Path) -> TransactionConfig {
    TransactionConfig {
        storage_path: Some(path.to_string_lossy().into_owned()),
        ..transaction_config()
    }
}

#[test]
fn test_records_survive_reload() {
    let path = temp_path("transactions.json");
    let store = TransactionStore::new(persistent_config(&path));

    let confirmed = store.add_transaction(NewTransaction::pending(
        LedgerCall::FundTreasury {
            amount: U256::from(5_000_000u64),
        },
        Address::repeat_byte(1),
        Address::repeat_byte(2),
        Some("5000000".to_string()),
    ));
    store.update_transaction(&confirmed, TransactionPatch::confirmed(format!("0x{}", "ab".repeat(32)), 42));

    let failed = store.add_transaction(NewTransaction::pending(
        LedgerCall::AddPayee {
            payee: PAYEE,
            salary: U256::from(3_000_000_000u64),
        },
        Address::repeat_byte(1),
        Address::repeat_byte(2),
        None,
    ));
    store.update_transaction(
        &failed,
        TransactionPatch {
            retry_count: Some(2),
            ..TransactionPatch::failed("execution reverted".to_string())
        },
    );

    let reloaded = TransactionStore::load(persistent_config(&path)).unwrap();
    assert_eq!(reloaded.all(), store.all());

    let tx = reloaded.get(&failed).unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(tx.retry_count, 2);
    assert!(matches!(tx.call, Some(LedgerCall::AddPayee { payee, .. }) if payee == PAYEE));
    assert_eq!(reloaded.get(&confirmed).unwrap().block_number, Some(42));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_missing_file_loads_empty_and_corrupt_file_errors() {
    let path = temp_path("absent.json");
    assert!(TransactionStore::load(persistent_config(&path)).unwrap().is_empty());

    std::fs::write(&path, "{ not json").unwrap();
    assert!(TransactionStore::load(persistent_config(&path)).is_err());
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_track_resolves_against_ledger() {
    let clock = Arc::new(ManualClock::new(START));
    let ledger = ledger(&clock, 0);
    let store = TransactionStore::new(transaction_config());
    let operator = ledger.facilitator();

    let call = LedgerCall::AddPayee {
        payee: PAYEE,
        salary: U256::from(1_000u64),
    };
    let tx = store.track(call.clone(), operator, ledger.address(), None, &ledger).await;
    assert_eq!(tx.status, TransactionStatus::Confirmed);
    assert_eq!(tx.tx_type, TransactionType::AddPayee);
    assert!(tx.block_number.is_some());
    assert!(tx.confirmed_at.is_some());
    assert_ne!(tx.hash, "pending");

    // Registering the same payee twice reverts.
    let tx = store.track(call, operator, ledger.address(), None, &ledger).await;
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert!(tx.error.is_some());
    assert!(tx.block_number.is_none());

    assert_eq!(store.len(), 2);
    assert!(store.pending().is_empty());
}

#[tokio::test]
async fn test_failed_payroll_run_confirms_on_retry() {
    let clock = Arc::new(ManualClock::new(START));
    let ledger = ledger(&clock, 0);
    ledger.add_payee(PAYEE, U256::from(1_000u64)).await.unwrap();
    clock.advance(PAY_PERIOD_SECS);

    let store = TransactionStore::new(transaction_config());
    let tx = store
        .track(LedgerCall::CreatePayments, ledger.facilitator(), ledger.address(), None, &ledger)
        .await;
    assert_eq!(tx.status, TransactionStatus::Failed);

    ledger.fund_treasury(U256::from(1_000u64)).await.unwrap();
    let resubmitter = LedgerResubmitter::new(Arc::new(ledger.clone()));
    let summary = store.retry_failed_transactions(&resubmitter).await;
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.confirmed, 1);

    let tx = store.get(&tx.id).unwrap();
    assert_eq!(tx.status, TransactionStatus::Confirmed);
    assert_eq!(tx.retry_count, 1);
    assert!(ledger.get_payment_request(1).await.unwrap().is_some());
}

#[tokio::test]
async fn test_retries_stop_at_bound() {
    let clock = Arc::new(ManualClock::new(START));
    let ledger = ledger(&clock, 0);
    let store = TransactionStore::new(TransactionConfig {
        max_retries: 2,
        ..transaction_config()
    });

    // Unknown payee: fails every time.
    let tx = store
        .track(
            LedgerCall::DeactivatePayee { payee: PAYEE },
            ledger.facilitator(),
            ledger.address(),
            None,
            &ledger,
        )
        .await;
    let resubmitter = LedgerResubmitter::new(Arc::new(ledger.clone()));

    let mut attempted = 0;
    for _ in 0..4 {
        attempted += store.retry_failed_transactions(&resubmitter).await.attempted;
    }
    assert_eq!(attempted, 2);

    let tx = store.get(&tx.id).unwrap();
    assert_eq!(tx.retry_count, 2);
    assert_eq!(tx.status, TransactionStatus::Failed);
}

#[test]
fn test_interrupted_pending_records_load_as_failed() {
    let path = temp_path("interrupted.json");
    let store = TransactionStore::new(persistent_config(&path));
    let id = store.add_transaction(NewTransaction::pending(
        LedgerCall::FundTreasury {
            amount: U256::from(7u64),
        },
        Address::repeat_byte(1),
        Address::repeat_byte(2),
        Some("7".to_string()),
    ));
    assert_eq!(store.pending().len(), 1);

    // The owning process went away with the submission in flight.
    drop(store);
    let reloaded = TransactionStore::load(persistent_config(&path)).unwrap();

    assert!(reloaded.pending().is_empty());
    let tx = reloaded.get(&id).unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert!(tx.outcome_unknown);
    assert!(tx.error.is_some());

    // The reconciled state is what is on disk now.
    let again = TransactionStore::load(persistent_config(&path)).unwrap();
    assert_eq!(again.get(&id).unwrap().status, TransactionStatus::Failed);

    std::fs::remove_file(&path).ok();
}
