//! Settled payment receipts and their persistence.
//!
//! Receipts are keyed by `(payee, amount)`. Two distinct requests for the
//! same payee and amount inside the tracking window share a key, so the
//! second one reads as already paid.

use alloy::primitives::{Address, B256, U256};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use crate::ledger::types::u256_decimal;

/// Proof that a payment was settled through the facilitator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub payment_id: String,
    pub payee: Address,
    #[serde(with = "u256_decimal")]
    pub amount: U256,
    pub tx_hash: B256,
    pub settlement_id: B256,
    #[serde(default)]
    pub request_id: Option<u64>,
    /// Whether the ledger recorded the settlement.
    #[serde(default)]
    pub ledger_acknowledged: bool,
    /// Seconds since epoch.
    pub settled_at: u64,
}

type ReceiptKey = (Address, U256);

/// A thread-safe store of receipts with an expiry window.
#[derive(Clone, Debug)]
pub struct PaymentReceipts {
    inner: Arc<DashMap<ReceiptKey, PaymentReceipt>>,
    window_secs: u64,
    persistence_path: Option<String>,
}

impl PaymentReceipts {
    pub fn new(window_secs: u64, persistence_path: Option<String>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            window_secs,
            persistence_path,
        }
    }

    /// Load from file if it exists; otherwise start empty.
    pub fn load_from_file(path: &str, window_secs: u64) -> std::io::Result<Self> {
        let receipts = Self::new(window_secs, Some(path.to_string()));
        if Path::new(path).exists() {
            let reader = BufReader::new(File::open(path)?);
            let stored: Vec<PaymentReceipt> = serde_json::from_reader(reader)?;
            for receipt in stored {
                receipts.inner.insert((receipt.payee, receipt.amount), receipt);
            }
            tracing::info!(count = receipts.inner.len(), path, "Loaded payment receipts");
        }
        Ok(receipts)
    }

    pub fn save_to_file(&self) -> std::io::Result<()> {
        if let Some(path) = &self.persistence_path {
            let writer = BufWriter::new(File::create(path)?);
            let mut stored: Vec<PaymentReceipt> =
                self.inner.iter().map(|r| r.value().clone()).collect();
            stored.sort_by_key(|r| r.settled_at);
            serde_json::to_writer_pretty(writer, &stored)?;
            tracing::debug!(count = stored.len(), path = %path, "Saved payment receipts");
        }
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save_to_file() {
            tracing::warn!(error = %e, "Failed to persist payment receipts");
        }
    }

    pub fn record(&self, receipt: PaymentReceipt) {
        if let Some(previous) = self.inner.get(&(receipt.payee, receipt.amount)) {
            if !previous.ledger_acknowledged && previous.request_id != receipt.request_id {
                tracing::warn!(
                    payment_id = %previous.payment_id,
                    request_id = ?previous.request_id,
                    tx_hash = %previous.tx_hash,
                    "Replacing a receipt the ledger never acknowledged"
                );
            }
        }
        tracing::info!(
            payment_id = %receipt.payment_id,
            payee = %receipt.payee,
            tx_hash = %receipt.tx_hash,
            "Recorded payment receipt"
        );
        self.inner.insert((receipt.payee, receipt.amount), receipt);
        self.persist();
    }

    /// Receipt for `(payee, amount)` settled within the window ending at `now`.
    /// A receipt the ledger has not acknowledged is returned at any age.
    pub fn lookup(&self, payee: Address, amount: U256, now: u64) -> Option<PaymentReceipt> {
        let receipt = self.inner.get(&(payee, amount))?;
        (self.in_window(&receipt, now) || !receipt.ledger_acknowledged).then(|| receipt.clone())
    }

    /// Whether `receipt` settled within the window ending at `now`.
    pub fn in_window(&self, receipt: &PaymentReceipt, now: u64) -> bool {
        receipt.settled_at.saturating_add(self.window_secs) >= now
    }

    /// Receipt referencing ledger request `request_id`, regardless of age.
    pub fn find_by_request(&self, request_id: u64) -> Option<PaymentReceipt> {
        self.inner
            .iter()
            .find(|r| r.request_id == Some(request_id))
            .map(|r| r.value().clone())
    }

    /// Flag the receipt as recorded on the ledger. Returns false if unknown.
    pub fn mark_acknowledged(&self, payee: Address, amount: U256) -> bool {
        let updated = match self.inner.get_mut(&(payee, amount)) {
            Some(mut receipt) => {
                receipt.ledger_acknowledged = true;
                true
            }
            None => false,
        };
        if updated {
            self.persist();
        }
        updated
    }

    /// Drop receipts older than the window. Returns how many were removed.
    pub fn prune(&self, now: u64) -> usize {
        let before = self.inner.len();
        self.inner
            .retain(|_, r| !r.ledger_acknowledged || r.settled_at.saturating_add(self.window_secs) >= now);
        let removed = before - self.inner.len();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(payee: Address, amount: u64, settled_at: u64) -> PaymentReceipt {
        PaymentReceipt {
            payment_id: format!("pay-{}", amount),
            payee,
            amount: U256::from(amount),
            tx_hash: B256::repeat_byte(0xaa),
            settlement_id: B256::repeat_byte(0xbb),
            request_id: Some(7),
            ledger_acknowledged: false,
            settled_at,
        }
    }

    #[test]
    fn test_lookup_respects_window() {
        let receipts = PaymentReceipts::new(100, None);
        let payee = Address::repeat_byte(0xab);
        receipts.record(receipt(payee, 1_000_000, 1_000));

        assert!(receipts.mark_acknowledged(payee, U256::from(1_000_000)));

        assert!(receipts.lookup(payee, U256::from(1_000_000), 1_050).is_some());
        assert!(receipts.lookup(payee, U256::from(1_000_000), 1_101).is_none());
        assert!(receipts.lookup(payee, U256::from(999_999), 1_050).is_none());
    }

    #[test]
    fn test_unacknowledged_receipt_outlives_window() {
        let receipts = PaymentReceipts::new(100, None);
        let payee = Address::repeat_byte(0xab);
        receipts.record(receipt(payee, 1_000_000, 1_000));

        let found = receipts.lookup(payee, U256::from(1_000_000), 1_000 + 86_400).unwrap();
        assert!(!found.ledger_acknowledged);
        assert!(!receipts.in_window(&found, 1_000 + 86_400));
        assert_eq!(receipts.prune(1_000 + 86_400), 0);
    }

    #[test]
    fn test_same_payee_and_amount_collide() {
        let receipts = PaymentReceipts::new(100, None);
        let payee = Address::repeat_byte(0xab);
        receipts.record(receipt(payee, 5, 10));
        let mut second = receipt(payee, 5, 20);
        second.payment_id = "other".to_string();
        receipts.record(second);

        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts.lookup(payee, U256::from(5), 20).unwrap().payment_id, "other");
    }

    #[test]
    fn test_acknowledge_and_prune() {
        let receipts = PaymentReceipts::new(10, None);
        let payee = Address::repeat_byte(1);
        receipts.record(receipt(payee, 1, 0));
        receipts.record(receipt(Address::repeat_byte(2), 1, 0));

        assert!(receipts.mark_acknowledged(payee, U256::from(1)));
        assert!(!receipts.mark_acknowledged(Address::repeat_byte(3), U256::from(1)));
        assert_eq!(receipts.find_by_request(7).map(|r| r.request_id), Some(Some(7)));

        // Unacknowledged receipts survive so the ledger ack can be retried.
        assert_eq!(receipts.prune(100), 1);
        assert_eq!(receipts.len(), 1);
    }

    #[test]
    fn test_persistence() {
        let path = std::env::temp_dir().join(format!("receipts-{}.json", uuid::Uuid::new_v4()));
        let path = path.to_string_lossy().to_string();

        let receipts = PaymentReceipts::new(100, Some(path.clone()));
        let payee = Address::repeat_byte(0xcd);
        receipts.record(receipt(payee, 3_000_000_000, 42));

        let loaded = PaymentReceipts::load_from_file(&path, 100).unwrap();
        assert_eq!(
            loaded.lookup(payee, U256::from(3_000_000_000u64), 42),
            receipts.lookup(payee, U256::from(3_000_000_000u64), 42)
        );

        std::fs::remove_file(&path).unwrap_or_default();
    }
}
