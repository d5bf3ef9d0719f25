//! Shared doubles and fixtures for integration tests.
#![allow(dead_code)]

use alloy::primitives::{address, Address, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use x402_payroll::blockchain::{BlockchainError, BlockchainResult, ChainReader, Wallet};
use x402_payroll::config::{FacilitatorConfig, PayrollConfig, TransactionConfig};
use x402_payroll::facilitator::{
    Facilitator, FacilitatorError, PaymentChallenge, PaymentRequirements, SettleResponse, VerifyResponse,
    EVENT_SETTLED,
};
use x402_payroll::http::{AppState, WebhookLog};
use x402_payroll::ledger::{Clock, InMemoryLedger, ManualClock, PayrollLedger};
use x402_payroll::payments::authorization::decode_header;
use x402_payroll::payments::{NetworkRegistry, PaymentOrchestrator, PaymentReceipts};
use x402_payroll::transactions::{LedgerResubmitter, TransactionStore};

/// Well-known development key (anvil account 0).
pub const TEST_PRIVATE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const SETTLE_TX: &str = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";
pub const START: u64 = 1_700_000_000;
pub const PAYEE: Address = address!("1111111111111111111111111111111111111111");
pub const ADMIN_KEY: &str = "test-admin-key";

pub fn wallet() -> Wallet {
    Wallet::from_private_key(TEST_PRIVATE_KEY, 1).unwrap()
}

/// Facilitator double. Counts calls, remembers headers and can reject
/// authorizations that expired by the time `settle` runs.
#[derive(Default)]
pub struct MockFacilitator {
    pub reject_verify: bool,
    pub settle_event: Option<String>,
    pub settlement_id: Option<String>,
    /// Enforce `validBefore` against this clock at settle time.
    pub clock: Option<Arc<ManualClock>>,
    /// Seconds the clock moves between verify and settle.
    pub settle_delay_secs: u64,
    pub verifies: AtomicUsize,
    pub settles: AtomicUsize,
    pub headers: Mutex<Vec<String>>,
}

impl MockFacilitator {
    pub fn settles(&self) -> usize {
        self.settles.load(Ordering::SeqCst)
    }

    pub fn verifies(&self) -> usize {
        self.verifies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Facilitator for MockFacilitator {
    async fn verify(&self, header: &str, _: &PaymentRequirements) -> Result<VerifyResponse, FacilitatorError> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        self.headers.lock().unwrap().push(header.to_string());
        Ok(VerifyResponse {
            is_valid: !self.reject_verify,
            invalid_reason: self.reject_verify.then(|| "invalid_signature".to_string()),
        })
    }

    async fn settle(&self, header: &str, _: &PaymentRequirements) -> Result<SettleResponse, FacilitatorError> {
        self.settles.fetch_add(1, Ordering::SeqCst);

        if let Some(clock) = &self.clock {
            clock.advance(self.settle_delay_secs);
            let payload = decode_header(header).map_err(|e| FacilitatorError::Decode(e.to_string()))?;
            if clock.now() >= payload.payload.valid_before {
                return Ok(SettleResponse {
                    event: "payment.failed".to_string(),
                    error: Some("authorization expired".to_string()),
                    ..SettleResponse::default()
                });
            }
        }

        Ok(SettleResponse {
            event: self.settle_event.clone().unwrap_or_else(|| EVENT_SETTLED.to_string()),
            tx_hash: Some(SETTLE_TX.to_string()),
            settlement_id: self.settlement_id.clone(),
            ..SettleResponse::default()
        })
    }
}

/// Chain reader that fails a scripted number of `head_block` calls before
/// delegating.
pub struct FlakyReader {
    inner: Arc<dyn ChainReader>,
    failures_left: AtomicU32,
    pub head_calls: AtomicU32,
}

impl FlakyReader {
    pub fn new(inner: Arc<dyn ChainReader>, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
            head_calls: AtomicU32::new(0),
        }
    }

    pub fn fail_next(&self, failures: u32) {
        self.failures_left.store(failures, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainReader for FlakyReader {
    async fn head_block(&self) -> BlockchainResult<u64> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(BlockchainError::Rpc("connection refused".to_string()));
        }
        self.inner.head_block().await
    }

    async fn logs(&self, address: Address, from_block: u64, to_block: u64) -> BlockchainResult<Vec<Log>> {
        self.inner.logs(address, from_block, to_block).await
    }

    async fn block_timestamp(&self, block_number: u64) -> BlockchainResult<u64> {
        self.inner.block_timestamp(block_number).await
    }
}

/// Ledger on a manual clock, funded with `balance`.
pub fn ledger(clock: &Arc<ManualClock>, balance: u64) -> InMemoryLedger {
    InMemoryLedger::builder()
        .clock(clock.clone())
        .balance(U256::from(balance))
        .build()
}

pub fn orchestrator(
    facilitator: Arc<MockFacilitator>,
    ledger: Arc<dyn PayrollLedger>,
    clock: Arc<ManualClock>,
) -> PaymentOrchestrator {
    PaymentOrchestrator::new(
        facilitator,
        ledger,
        PaymentReceipts::new(24 * 3600, None),
        NetworkRegistry::default(),
        FacilitatorConfig::default(),
    )
    .with_clock(clock)
}

/// A challenge the way a payee-facing resource would issue it.
pub fn challenge(payment_id: &str, request_id: Option<u64>, amount: &str) -> PaymentChallenge {
    let mut extra = serde_json::json!({ "paymentId": payment_id });
    if let Some(id) = request_id {
        extra["requestId"] = serde_json::json!(id.to_string());
    }
    serde_json::from_value(serde_json::json!({
        "x402Version": 1,
        "accepts": [{
            "scheme": "exact",
            "network": "cronos-testnet",
            "asset": "0xc01efaaf7c5c61bebfaeb358e1161b537b8bc0e0",
            "payTo": PAYEE,
            "maxAmountRequired": amount,
            "resource": "http://localhost/api/payments",
            "description": "Payroll payment",
            "mimeType": "application/json",
            "maxTimeoutSeconds": 300,
            "extra": extra
        }]
    }))
    .unwrap()
}

pub fn transaction_config() -> TransactionConfig {
    TransactionConfig {
        storage_path: None,
        retry_backoff_ms: 0,
        ..TransactionConfig::default()
    }
}

/// HTTP state over an in-memory ledger.
pub fn app_state(ledger: InMemoryLedger, orchestrator: PaymentOrchestrator) -> AppState {
    let mut config = PayrollConfig::default();
    config.server.admin_api_key = ADMIN_KEY.to_string();
    let operator = ledger.facilitator();
    let ledger: Arc<dyn PayrollLedger> = Arc::new(ledger);

    AppState {
        config: Arc::new(config),
        ledger: ledger.clone(),
        orchestrator,
        transactions: TransactionStore::new(transaction_config()),
        resubmitter: Arc::new(LedgerResubmitter::new(ledger)),
        webhooks: WebhookLog::new(1000),
        chain: None,
        operator,
    }
}

/// Unique scratch file path under the system temp dir.
pub fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("x402-payroll-{}-{}", name, uuid::Uuid::new_v4().simple()))
}
