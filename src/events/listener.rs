//! Contract event listener.
//!
//! Polls the chain head and fans decoded ledger events out to callback
//! subscribers and a broadcast stream. The next poll is scheduled only after
//! the current one has finished, and a lock keeps manual `poll_once` calls
//! from overlapping the loop. Each `start` begins a new generation; a loop
//! from an earlier generation exits at its next check.

use alloy::primitives::Address;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};

use crate::blockchain::{BlockchainError, ChainReader};
use crate::config::ListenerConfig;
use crate::events::types::{ContractEvent, EventFilter, LedgerEvent};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Chain read failed: {0}")]
    Chain(#[from] BlockchainError),

    #[error("Event polling failed {attempts} times in a row: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

pub type EventCallback = Arc<dyn Fn(&ContractEvent) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&ListenerError) + Send + Sync>;

struct Inner {
    reader: Arc<dyn ChainReader>,
    address: Address,
    config: ListenerConfig,
    last_processed: AtomicU64,
    running: AtomicBool,
    generation: AtomicU64,
    wake: Notify,
    poll_lock: tokio::sync::Mutex<()>,
    subscribers: Mutex<Vec<(u64, EventFilter, EventCallback)>>,
    next_subscriber: AtomicU64,
    on_error: Mutex<Option<ErrorCallback>>,
    stream: broadcast::Sender<ContractEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle returned by [`ContractEventListener::subscribe`].
pub struct EventSubscription {
    id: u64,
    inner: Weak<Inner>,
}

impl EventSubscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.subscribers).retain(|(id, _, _)| *id != self.id);
        }
    }
}

/// Long-lived listener for one ledger contract. Clones share state.
#[derive(Clone)]
pub struct ContractEventListener {
    inner: Arc<Inner>,
}

impl ContractEventListener {
    pub fn new(reader: Arc<dyn ChainReader>, address: Address, config: ListenerConfig) -> Self {
        let (stream, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                reader,
                address,
                config,
                last_processed: AtomicU64::new(0),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                wake: Notify::new(),
                poll_lock: tokio::sync::Mutex::new(()),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(0),
                on_error: Mutex::new(None),
                stream,
            }),
        }
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// Highest block whose events have been delivered.
    pub fn last_processed_block(&self) -> u64 {
        self.inner.last_processed.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Register a callback for events matching `filter`.
    pub fn subscribe(
        &self,
        filter: impl Into<EventFilter>,
        callback: impl Fn(&ContractEvent) + Send + Sync + 'static,
    ) -> EventSubscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.subscribers).push((id, filter.into(), Arc::new(callback)));
        EventSubscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Stream of every delivered event for async consumers.
    pub fn stream(&self) -> broadcast::Receiver<ContractEvent> {
        self.inner.stream.subscribe()
    }

    /// Called once when the listener gives up after exhausting its retries.
    pub fn on_error(&self, callback: impl Fn(&ListenerError) + Send + Sync + 'static) {
        *lock(&self.inner.on_error) = Some(Arc::new(callback));
    }

    /// Set the watermark to the current head and start polling. Events in
    /// blocks up to the head are not delivered. Calling start on a running
    /// listener does nothing.
    pub async fn start(&self) -> Result<(), ListenerError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let head = match self.inner.reader.head_block().await {
            Ok(head) => head,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        self.inner.last_processed.fetch_max(head, Ordering::SeqCst);
        metrics::record_listener_block(head);
        tracing::info!(
            contract = %self.inner.address,
            block = head,
            interval_ms = self.inner.config.poll_interval_ms,
            "Event listener started"
        );

        let listener = self.clone();
        tokio::spawn(async move { listener.run(generation).await });
        Ok(())
    }

    /// Stop polling. Safe to call repeatedly.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            tracing::info!(contract = %self.inner.address, "Event listener stopping");
        }
        self.inner.wake.notify_one();
    }

    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.inner.wake.notified() => {}
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.inner.generation.load(Ordering::SeqCst) == generation
    }

    async fn run(&self, generation: u64) {
        let poll_interval = Duration::from_millis(self.inner.config.poll_interval_ms);
        let retry_delay = Duration::from_millis(self.inner.config.retry_delay_ms);
        let max_retries = self.inner.config.max_retries;
        let mut failures: u32 = 0;

        self.sleep(poll_interval).await;
        while self.is_current(generation) {
            match self.poll_once().await {
                Ok(_) => {
                    failures = 0;
                    self.sleep(poll_interval).await;
                }
                Err(e) => {
                    failures += 1;
                    metrics::record_listener_failure();
                    tracing::warn!(
                        error = %e,
                        failures,
                        max_retries,
                        from_block = self.last_processed_block() + 1,
                        "Event poll failed"
                    );
                    if failures > max_retries {
                        self.fail(
                            generation,
                            ListenerError::RetriesExhausted {
                                attempts: failures,
                                last_error: e.to_string(),
                            },
                        );
                        break;
                    }
                    self.sleep(retry_delay).await;
                }
            }
        }
        tracing::info!(contract = %self.inner.address, generation, "Event listener stopped");
    }

    fn fail(&self, generation: u64, error: ListenerError) {
        if !self.is_current(generation) {
            return;
        }
        tracing::error!(error = %error, "Event listener giving up");
        self.inner.running.store(false, Ordering::SeqCst);
        let callback = lock(&self.inner.on_error).clone();
        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(&error))).is_err() {
                tracing::error!("Listener error callback panicked");
            }
        }
    }

    /// Run one poll cycle: fetch logs after the watermark up to the head in
    /// spans of at most `max_block_range` blocks, deliver what decodes, and
    /// advance the watermark after each span. Returns the number of events
    /// delivered.
    pub async fn poll_once(&self) -> Result<usize, ListenerError> {
        let _cycle = self.inner.poll_lock.lock().await;

        let last = self.last_processed_block();
        let head = self.inner.reader.head_block().await?;
        if head <= last {
            return Ok(0);
        }

        let span = self.inner.config.max_block_range.max(1);
        let mut delivered = 0;
        let mut from = last + 1;
        loop {
            let to = head.min(from.saturating_add(span - 1));
            delivered += self.deliver_range(from, to).await?;
            self.inner.last_processed.fetch_max(to, Ordering::SeqCst);
            metrics::record_listener_block(to);
            if to == head {
                break;
            }
            from = to + 1;
        }

        if delivered > 0 {
            tracing::info!(from = last + 1, to = head, events = delivered, "Delivered ledger events");
        }
        Ok(delivered)
    }

    async fn deliver_range(&self, from: u64, to: u64) -> Result<usize, ListenerError> {
        let reader = &self.inner.reader;
        let logs = reader.logs(self.inner.address, from, to).await?;
        let mut timestamps: HashMap<u64, u64> = HashMap::new();
        let mut events = Vec::with_capacity(logs.len());

        for log in &logs {
            let Some(block_number) = log.block_number else {
                tracing::warn!(tx_hash = ?log.transaction_hash, "Skipping log without a block number");
                continue;
            };
            let args = match LedgerEvent::decode(log) {
                Ok(LedgerEvent::Unknown { topic0 }) => {
                    tracing::debug!(?topic0, block = block_number, "Skipping unrecognized log");
                    continue;
                }
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, block = block_number, tx_hash = ?log.transaction_hash, "Skipping malformed log");
                    continue;
                }
            };

            let seconds = match timestamps.get(&block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = reader.block_timestamp(block_number).await?;
                    timestamps.insert(block_number, ts);
                    ts
                }
            };
            let timestamp = Utc
                .timestamp_opt(seconds as i64, 0)
                .single()
                .unwrap_or_else(Utc::now);

            events.push(ContractEvent {
                name: args.name(),
                block_number,
                transaction_hash: log.transaction_hash,
                log_index: log.log_index,
                args,
                timestamp,
            });
        }
        events.sort_by_key(|e| (e.block_number, e.log_index));

        for event in &events {
            self.dispatch(event);
        }
        tracing::debug!(from, to, events = events.len(), "Scanned block range");
        Ok(events.len())
    }

    fn dispatch(&self, event: &ContractEvent) {
        metrics::record_listener_event(event.name);

        let callbacks: Vec<EventCallback> = lock(&self.inner.subscribers)
            .iter()
            .filter(|(_, filter, _)| filter.matches(event.name))
            .map(|(_, _, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::error!(event = event.name, "Event subscriber panicked");
            }
        }

        // No receivers is fine.
        let _ = self.inner.stream.send(event.clone());
    }
}

impl std::fmt::Debug for ContractEventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractEventListener")
            .field("address", &self.inner.address)
            .field("last_processed", &self.last_processed_block())
            .field("running", &self.is_running())
            .finish()
    }
}
