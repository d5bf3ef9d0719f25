//! Transaction store: bookkeeping for locally initiated ledger writes.
//!
//! Every mutation persists the store and notifies subscribers with a fresh,
//! newest-first snapshot. A subscriber that panics is logged and skipped.
//!
//! A submission dropped before its outcome is known marks its record failed.
//! Records left pending by a previous process fail on load. A retry pass
//! first fails records nobody owns that have been pending longer than
//! `pending_timeout_secs`. Retry passes run one at a time.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::TransactionConfig;
use crate::ledger::{LedgerCall, LedgerReceipt, PayrollLedger};
use crate::observability::metrics;
use crate::resilience::{user_friendly_message, with_timeout};
use crate::transactions::types::{
    NewTransaction, Transaction, TransactionPatch, TransactionStatus, TransactionType, PENDING_HASH,
};

/// Key under which records are persisted.
pub const STORAGE_KEY: &str = "payroll_transactions";

#[derive(Debug, Error)]
pub enum TransactionStoreError {
    #[error("Transaction storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transaction storage is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Callback receiving the full record list after every mutation.
pub type Listener = Arc<dyn Fn(&[Transaction]) + Send + Sync>;

/// Re-runs the chain operation behind a failed record.
#[async_trait]
pub trait Resubmit: Send + Sync {
    async fn resubmit(&self, tx: &Transaction) -> Result<LedgerReceipt, Box<dyn Error + Send + Sync>>;
}

/// Resubmits the recorded [`LedgerCall`] against a ledger.
pub struct LedgerResubmitter {
    ledger: Arc<dyn PayrollLedger>,
}

impl LedgerResubmitter {
    pub fn new(ledger: Arc<dyn PayrollLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Resubmit for LedgerResubmitter {
    async fn resubmit(&self, tx: &Transaction) -> Result<LedgerReceipt, Box<dyn Error + Send + Sync>> {
        let call = tx
            .call
            .as_ref()
            .ok_or_else(|| format!("transaction {} has no recorded call to resubmit", tx.id))?;
        Ok(call.execute(self.ledger.as_ref()).await?)
    }
}

/// Outcome of one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySummary {
    pub attempted: usize,
    pub confirmed: usize,
    pub failed: usize,
}

#[derive(Serialize, Deserialize)]
struct Stored {
    #[serde(rename = "payroll_transactions", default)]
    records: Vec<Transaction>,
}

struct Inner {
    records: Mutex<HashMap<String, Transaction>>,
    /// Ids of records a live submission owns. Locked before `records`
    /// whenever both are held.
    active: Mutex<HashSet<String>>,
    retry_lock: tokio::sync::Mutex<()>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    config: TransactionConfig,
    storage: Option<PathBuf>,
}

/// Handle returned by [`TransactionStore::subscribe`].
pub struct Subscription {
    id: u64,
    inner: std::sync::Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared transaction store. Clones share state.
#[derive(Clone)]
pub struct TransactionStore {
    inner: Arc<Inner>,
}

impl TransactionStore {
    /// Empty store persisting to `config.storage_path`, if any.
    pub fn new(config: TransactionConfig) -> Self {
        let storage = config.storage_path.as_ref().map(PathBuf::from);
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(HashMap::new()),
                active: Mutex::new(HashSet::new()),
                retry_lock: tokio::sync::Mutex::new(()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                config,
                storage,
            }),
        }
    }

    /// Store restored from `config.storage_path`. Records still pending
    /// were interrupted with the process that owned them and load as failed.
    pub fn load(config: TransactionConfig) -> Result<Self, TransactionStoreError> {
        let store = Self::new(config);
        if let Some(path) = store.inner.storage.as_deref().filter(|p| p.exists()) {
            let stored: Stored = serde_json::from_reader(BufReader::new(File::open(path)?))?;
            let count = stored.records.len();
            {
                let mut records = lock(&store.inner.records);
                for tx in stored.records {
                    records.insert(tx.id.clone(), tx);
                }
            }
            tracing::info!(count, path = %path.display(), "Loaded transactions");
            store.fail_orphaned(None);
        }
        Ok(store)
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.inner.config
    }

    fn save(&self, snapshot: &[Transaction]) {
        let Some(path) = self.inner.storage.as_deref() else {
            return;
        };
        if let Err(e) = write_snapshot(path, snapshot) {
            tracing::warn!(error = %e, path = %path.display(), "Failed to persist transactions");
        }
    }

    /// Persist, report and notify after a mutation.
    fn publish(&self) {
        let snapshot = self.all();
        self.save(&snapshot);

        let count = |s| snapshot.iter().filter(|t| t.status == s).count();
        metrics::record_transactions(
            count(TransactionStatus::Pending),
            count(TransactionStatus::Confirmed),
            count(TransactionStatus::Failed),
        );

        let listeners: Vec<Listener> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            let snapshot = snapshot.clone();
            if catch_unwind(AssertUnwindSafe(|| listener(&snapshot))).is_err() {
                tracing::error!("Transaction listener panicked");
            }
        }
    }

    pub fn add_transaction(&self, new: NewTransaction) -> String {
        let id = new_id();
        self.insert(id.clone(), new);
        id
    }

    fn insert(&self, id: String, new: NewTransaction) {
        let tx = Transaction {
            id: id.clone(),
            hash: new.hash.unwrap_or_else(|| PENDING_HASH.to_string()),
            tx_type: new.tx_type,
            status: new.status,
            from: new.from,
            to: new.to,
            value: new.value,
            timestamp: Utc::now(),
            confirmed_at: None,
            block_number: None,
            error: None,
            retry_count: 0,
            outcome_unknown: false,
            call: new.call,
        };
        tracing::debug!(id = %id, tx_type = ?tx.tx_type, "Transaction added");
        {
            let mut records = lock(&self.inner.records);
            records.insert(id, tx);
            evict_oldest(&mut records, self.inner.config.max_records);
        }
        self.publish();
    }

    /// Merge `patch` into record `id`. Returns false for an unknown id.
    pub fn update_transaction(&self, id: &str, patch: TransactionPatch) -> bool {
        {
            let mut records = lock(&self.inner.records);
            match records.get_mut(id) {
                Some(tx) => patch.apply(tx),
                None => return false,
            }
        }
        self.publish();
        true
    }

    pub fn get(&self, id: &str) -> Option<Transaction> {
        lock(&self.inner.records).get(id).cloned()
    }

    pub fn by_type(&self, tx_type: TransactionType) -> Vec<Transaction> {
        let mut found: Vec<_> = lock(&self.inner.records)
            .values()
            .filter(|t| t.tx_type == tx_type)
            .cloned()
            .collect();
        sort_newest_first(&mut found);
        found
    }

    /// Pending records, oldest first.
    pub fn pending(&self) -> Vec<Transaction> {
        let mut found: Vec<_> = lock(&self.inner.records)
            .values()
            .filter(|t| t.status == TransactionStatus::Pending)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        found
    }

    /// All records, newest first.
    pub fn all(&self) -> Vec<Transaction> {
        let mut all: Vec<_> = lock(&self.inner.records).values().cloned().collect();
        sort_newest_first(&mut all);
        all
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self, listener: impl Fn(&[Transaction]) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Record `call`, run it against `ledger` and resolve the record to
    /// confirmed or failed. Dropping the returned future before it finishes
    /// leaves the record failed with an unknown outcome.
    pub async fn track(
        &self,
        call: LedgerCall,
        from: Address,
        to: Address,
        value: Option<U256>,
        ledger: &dyn PayrollLedger,
    ) -> Transaction {
        let id = new_id();
        let submission = Submission::claim(self, id.clone());
        self.insert(
            id.clone(),
            NewTransaction::pending(call.clone(), from, to, value.map(|v| v.to_string())),
        );

        let limit = Duration::from_secs(self.inner.config.pending_timeout_secs);
        let outcome = with_timeout(
            limit,
            async {
                call.execute(ledger)
                    .await
                    .map_err(|e| Unconfirmed::Failed(user_friendly_message(&e)))
            },
            |elapsed| Unconfirmed::TimedOut(elapsed.0),
        )
        .await;
        submission.resolve(outcome);

        match self.get(&id) {
            Some(tx) => tx,
            // Evicted by the retention cap while running.
            None => Transaction {
                id,
                hash: PENDING_HASH.to_string(),
                tx_type: TransactionType::from(&call),
                status: TransactionStatus::Failed,
                from,
                to,
                value: value.map(|v| v.to_string()),
                timestamp: Utc::now(),
                confirmed_at: None,
                block_number: None,
                error: Some("record evicted before completion".to_string()),
                retry_count: 0,
                outcome_unknown: false,
                call: Some(call),
            },
        }
    }

    /// Settle record `id` from a submission outcome. A receipt without a
    /// block number is not a confirmation.
    fn resolve(&self, id: &str, outcome: Result<LedgerReceipt, Unconfirmed>) -> bool {
        let patch = match outcome {
            Ok(LedgerReceipt {
                tx_hash,
                block_number: Some(block),
            }) => {
                tracing::info!(id, tx_hash = %tx_hash, block, "Transaction confirmed");
                TransactionPatch::confirmed(tx_hash.to_string(), block)
            }
            Ok(receipt) => {
                tracing::warn!(id, tx_hash = %receipt.tx_hash, "Submission reported without a block");
                TransactionPatch {
                    hash: Some(receipt.tx_hash.to_string()),
                    ..TransactionPatch::unconfirmed("Transaction was submitted but not confirmed".to_string())
                }
            }
            Err(Unconfirmed::Failed(message)) => {
                tracing::warn!(id, error = %message, "Transaction failed");
                TransactionPatch::failed(message)
            }
            Err(Unconfirmed::TimedOut(limit)) => {
                tracing::warn!(id, ?limit, "Transaction outcome unknown");
                TransactionPatch::unconfirmed(format!(
                    "Transaction was not confirmed within {:?} and may still be mined",
                    limit
                ))
            }
        };
        let confirmed = patch.status == Some(TransactionStatus::Confirmed);
        self.update_transaction(id, patch);
        confirmed
    }

    /// Fail pending records no live submission owns, limited to those
    /// pending at least `min_age_secs` when given.
    fn fail_orphaned(&self, min_age_secs: Option<u64>) -> usize {
        let now = Utc::now();
        let old_enough = |tx: &Transaction| match min_age_secs {
            Some(secs) => (now - tx.timestamp).num_seconds() >= i64::try_from(secs).unwrap_or(i64::MAX),
            None => true,
        };
        let orphaned: Vec<String> = {
            let active = lock(&self.inner.active);
            let mut records = lock(&self.inner.records);
            records
                .values_mut()
                .filter(|tx| {
                    tx.status == TransactionStatus::Pending && !active.contains(&tx.id) && old_enough(&**tx)
                })
                .map(|tx| {
                    TransactionPatch::unconfirmed(INTERRUPTED.to_string()).apply(tx);
                    tx.id.clone()
                })
                .collect()
        };
        if !orphaned.is_empty() {
            tracing::warn!(count = orphaned.len(), ids = ?orphaned, "Failed orphaned pending transactions");
            self.publish();
        }
        orphaned.len()
    }

    /// Whether `tx` may be resubmitted. A funding call whose last outcome is
    /// unknown is left for the operator.
    fn is_retryable(&self, tx: &Transaction) -> bool {
        tx.status == TransactionStatus::Failed
            && tx.retry_count < self.inner.config.max_retries
            && !(tx.outcome_unknown && tx.call.as_ref().is_some_and(|c| !c.is_repeatable()))
    }

    /// Flip record `id` to pending for its next attempt if it is still
    /// retryable. Returns the record as it was before the flip.
    fn claim_retry(&self, id: &str) -> Option<Transaction> {
        let claimed = {
            let mut records = lock(&self.inner.records);
            let tx = records.get_mut(id).filter(|tx| self.is_retryable(tx))?;
            let before = tx.clone();
            TransactionPatch {
                status: Some(TransactionStatus::Pending),
                error: Some(None),
                retry_count: Some(before.retry_count + 1),
                ..TransactionPatch::default()
            }
            .apply(tx);
            before
        };
        self.publish();
        Some(claimed)
    }

    /// Resubmit every failed record still under the retry bound. Concurrent
    /// calls wait for the running pass and then see its results.
    pub async fn retry_failed_transactions(&self, resubmitter: &dyn Resubmit) -> RetrySummary {
        let _pass = self.inner.retry_lock.lock().await;
        self.fail_orphaned(Some(self.inner.config.pending_timeout_secs));

        let max_retries = self.inner.config.max_retries;
        let candidates: Vec<String> = self
            .all()
            .into_iter()
            .rev()
            .filter(|t| self.is_retryable(t))
            .map(|t| t.id)
            .collect();

        let mut summary = RetrySummary::default();
        for id in candidates {
            let submission = Submission::claim(self, id.clone());
            let Some(tx) = self.claim_retry(&id) else {
                submission.release();
                continue;
            };
            summary.attempted += 1;
            tracing::info!(id = %tx.id, attempt = tx.retry_count + 1, max_retries, "Retrying transaction");

            tokio::time::sleep(Duration::from_millis(self.inner.config.retry_backoff_ms)).await;

            let limit = Duration::from_secs(self.inner.config.pending_timeout_secs);
            let outcome = with_timeout(
                limit,
                async {
                    resubmitter.resubmit(&tx).await.map_err(|e| {
                        let err: &(dyn Error + 'static) = e.as_ref();
                        Unconfirmed::Failed(user_friendly_message(err))
                    })
                },
                |elapsed| Unconfirmed::TimedOut(elapsed.0),
            )
            .await;

            if submission.resolve(outcome) {
                summary.confirmed += 1;
            } else {
                summary.failed += 1;
            }
        }
        if summary.attempted > 0 {
            tracing::info!(?summary, "Transaction retry pass finished");
        }
        summary
    }

    /// Run retry passes until shutdown, sleeping `retry_interval_secs` after
    /// each pass completes. A pass in progress finishes before shutdown is
    /// observed.
    pub async fn run_retry_loop(self, resubmitter: Arc<dyn Resubmit>, mut shutdown: broadcast::Receiver<()>) {
        let interval = Duration::from_secs(self.inner.config.retry_interval_secs);
        tracing::info!(interval_secs = interval.as_secs(), "Transaction retry loop started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            self.retry_failed_transactions(resubmitter.as_ref()).await;
        }
        tracing::info!("Transaction retry loop stopped");
    }
}

const INTERRUPTED: &str = "Transaction submission was interrupted before it was confirmed";

fn new_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

/// Why a submission did not confirm.
enum Unconfirmed {
    /// The chain answered with an error.
    Failed(String),
    /// No answer within the limit.
    TimedOut(Duration),
}

/// Ownership of one pending record by a live submission. Dropped without
/// [`Submission::resolve`] or [`Submission::release`], it fails the record.
struct Submission<'a> {
    store: &'a TransactionStore,
    id: String,
    armed: bool,
}

impl<'a> Submission<'a> {
    fn claim(store: &'a TransactionStore, id: String) -> Self {
        lock(&store.inner.active).insert(id.clone());
        Self { store, id, armed: true }
    }

    fn resolve(mut self, outcome: Result<LedgerReceipt, Unconfirmed>) -> bool {
        self.armed = false;
        self.store.resolve(&self.id, outcome)
    }

    fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for Submission<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(id = %self.id, "Transaction submission dropped before completion");
            let still_pending = self
                .store
                .get(&self.id)
                .is_some_and(|tx| tx.status == TransactionStatus::Pending);
            if still_pending {
                self.store
                    .update_transaction(&self.id, TransactionPatch::unconfirmed(INTERRUPTED.to_string()));
            }
        }
        lock(&self.store.inner.active).remove(&self.id);
    }
}

impl std::fmt::Debug for TransactionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStore")
            .field("records", &self.len())
            .field("storage", &self.inner.storage)
            .finish()
    }
}

fn sort_newest_first(records: &mut [Transaction]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
}

fn evict_oldest(records: &mut HashMap<String, Transaction>, cap: usize) {
    while records.len() > cap.max(1) {
        let oldest = records
            .values()
            .min_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
            .map(|t| t.id.clone());
        match oldest {
            Some(id) => {
                tracing::debug!(id = %id, "Evicting oldest transaction");
                records.remove(&id);
            }
            None => break,
        }
    }
}

fn write_snapshot(path: &Path, snapshot: &[Transaction]) -> Result<(), TransactionStoreError> {
    let tmp = path.with_extension("tmp");
    {
        let writer = BufWriter::new(File::create(&tmp)?);
        let stored = Stored {
            records: snapshot.to_vec(),
        };
        serde_json::to_writer_pretty(writer, &stored)?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;
    use std::sync::atomic::AtomicUsize;

    fn config(max_retries: u32) -> TransactionConfig {
        TransactionConfig {
            storage_path: None,
            max_retries,
            retry_backoff_ms: 10,
            max_records: 100,
            ..TransactionConfig::default()
        }
    }

    fn failed(store: &TransactionStore) -> String {
        failed_call(store, LedgerCall::FundTreasury { amount: U256::from(5) })
    }

    fn failed_call(store: &TransactionStore, call: LedgerCall) -> String {
        let value = call.value().map(|v| v.to_string());
        let id = store.add_transaction(NewTransaction::pending(
            call,
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            value,
        ));
        store.update_transaction(&id, TransactionPatch::failed("boom".to_string()));
        id
    }

    fn threshold() -> LedgerCall {
        LedgerCall::UpdateThreshold { threshold: U256::from(9) }
    }

    struct Always(Result<Option<u64>, &'static str>, AtomicUsize);

    #[async_trait]
    impl Resubmit for Always {
        async fn resubmit(&self, _: &Transaction) -> Result<LedgerReceipt, Box<dyn Error + Send + Sync>> {
            self.1.fetch_add(1, Ordering::SeqCst);
            match self.0 {
                Ok(block_number) => Ok(LedgerReceipt {
                    tx_hash: B256::repeat_byte(7),
                    block_number,
                }),
                Err(e) => Err(e.into()),
            }
        }
    }

    /// Never answers.
    struct Hangs(AtomicUsize);

    #[async_trait]
    impl Resubmit for Hangs {
        async fn resubmit(&self, _: &Transaction) -> Result<LedgerReceipt, Box<dyn Error + Send + Sync>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[test]
    fn test_update_unknown_is_noop() {
        let store = TransactionStore::new(config(3));
        assert!(!store.update_transaction("missing", TransactionPatch::default()));
    }

    #[test]
    fn test_listeners_get_snapshots_and_are_isolated() {
        let store = TransactionStore::new(config(3));
        let seen = Arc::new(AtomicUsize::new(0));

        let _bad = store.subscribe(|_| panic!("listener bug"));
        let counter = seen.clone();
        let good = store.subscribe(move |txs| {
            counter.store(txs.len(), Ordering::SeqCst);
        });

        failed(&store);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        good.unsubscribe();
        failed(&store);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_retention_cap_evicts_oldest() {
        let store = TransactionStore::new(TransactionConfig {
            max_records: 2,
            ..config(3)
        });
        let first = failed(&store);
        std::thread::sleep(Duration::from_millis(2));
        failed(&store);
        std::thread::sleep(Duration::from_millis(2));
        failed(&store);

        assert_eq!(store.len(), 2);
        assert!(store.get(&first).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_requires_mined_resubmission() {
        let store = TransactionStore::new(config(3));
        let id = failed_call(&store, threshold());

        let unmined = Always(Ok(None), AtomicUsize::new(0));
        let summary = store.retry_failed_transactions(&unmined).await;
        assert_eq!(summary, RetrySummary { attempted: 1, confirmed: 0, failed: 1 });
        assert_eq!(store.get(&id).unwrap().status, TransactionStatus::Failed);

        let mined = Always(Ok(Some(12)), AtomicUsize::new(0));
        let summary = store.retry_failed_transactions(&mined).await;
        assert_eq!(summary.confirmed, 1);
        let tx = store.get(&id).unwrap();
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert_eq!(tx.block_number, Some(12));
        assert_eq!(tx.retry_count, 2);
        assert!(tx.error.is_none());
        assert!(!tx.outcome_unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_passes_resubmit_each_record_once() {
        let store = TransactionStore::new(TransactionConfig {
            retry_backoff_ms: 20,
            ..config(3)
        });
        let first = failed(&store);
        let second = failed(&store);
        let mined = Always(Ok(Some(3)), AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            store.retry_failed_transactions(&mined),
            store.retry_failed_transactions(&mined)
        );

        assert_eq!(mined.1.load(Ordering::SeqCst), 2);
        assert_eq!(a.attempted + b.attempted, 2);
        assert_eq!(a.confirmed + b.confirmed, 2);
        for id in [first, second] {
            let tx = store.get(&id).unwrap();
            assert_eq!(tx.status, TransactionStatus::Confirmed);
            assert_eq!(tx.retry_count, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_pass_does_not_strand_record() {
        let store = TransactionStore::new(config(3));
        let id = failed_call(&store, threshold());

        let hangs = Hangs(AtomicUsize::new(0));
        let cut = tokio::time::timeout(Duration::from_millis(50), store.retry_failed_transactions(&hangs)).await;
        assert!(cut.is_err());

        let tx = store.get(&id).unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(tx.retry_count, 1);
        assert!(tx.outcome_unknown);
        assert!(store.pending().is_empty());

        let mined = Always(Ok(Some(4)), AtomicUsize::new(0));
        let summary = store.retry_failed_transactions(&mined).await;
        assert_eq!(summary.confirmed, 1);
        assert_eq!(mined.1.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(&id).unwrap().status, TransactionStatus::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_funding_is_not_resubmitted() {
        let store = TransactionStore::new(TransactionConfig {
            pending_timeout_secs: 1,
            ..config(3)
        });
        let funding = failed(&store);
        let update = failed_call(&store, threshold());

        let hangs = Hangs(AtomicUsize::new(0));
        let summary = store.retry_failed_transactions(&hangs).await;
        assert_eq!(summary, RetrySummary { attempted: 2, confirmed: 0, failed: 2 });
        let tx = store.get(&funding).unwrap();
        assert!(tx.outcome_unknown);
        assert!(tx.error.as_deref().unwrap().contains("may still be mined"));

        // The funding transfer may have landed; only the repeatable call goes again.
        let mined = Always(Ok(Some(5)), AtomicUsize::new(0));
        let summary = store.retry_failed_transactions(&mined).await;
        assert_eq!(summary.attempted, 1);
        assert_eq!(store.get(&update).unwrap().status, TransactionStatus::Confirmed);
        assert_eq!(store.get(&funding).unwrap().status, TransactionStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unowned_pending_record_is_failed_by_retry_pass() {
        let store = TransactionStore::new(TransactionConfig {
            pending_timeout_secs: 0,
            max_retries: 0,
            ..config(3)
        });
        let id = store.add_transaction(NewTransaction::pending(
            threshold(),
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            None,
        ));

        store
            .retry_failed_transactions(&Always(Ok(Some(1)), AtomicUsize::new(0)))
            .await;
        let tx = store.get(&id).unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert!(tx.outcome_unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound() {
        let store = TransactionStore::new(config(2));
        let id = failed(&store);
        let failing = Always(Err("rpc down"), AtomicUsize::new(0));

        for _ in 0..5 {
            store.retry_failed_transactions(&failing).await;
        }
        let tx = store.get(&id).unwrap();
        assert_eq!(tx.retry_count, 2);
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(failing.1.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_queries_are_sorted() {
        let store = TransactionStore::new(config(3));
        let a = store.add_transaction(NewTransaction::pending(
            LedgerCall::CreatePayments,
            Address::ZERO,
            Address::ZERO,
            None,
        ));
        std::thread::sleep(Duration::from_millis(2));
        let b = store.add_transaction(NewTransaction::pending(
            LedgerCall::CreatePayments,
            Address::ZERO,
            Address::ZERO,
            None,
        ));

        let pending: Vec<_> = store.pending().into_iter().map(|t| t.id).collect();
        assert_eq!(pending, vec![a.clone(), b.clone()]);
        let all: Vec<_> = store.all().into_iter().map(|t| t.id).collect();
        assert_eq!(all, vec![b, a]);
        assert_eq!(store.by_type(TransactionType::CreatePayments).len(), 2);
        assert!(store.by_type(TransactionType::AddPayee).is_empty());
    }
}
