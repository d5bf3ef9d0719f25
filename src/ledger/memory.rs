//! In-process model of the payroll ledger contract.
//!
//! Runs the same state machine as the deployed contract (payee lifecycle,
//! 30-day accrual, atomic payroll, facilitator-only monotonic settlement,
//! two-factor payroll trigger) and mines one pseudo-block per successful
//! write. Every write emits the contract's events as real logs, so the
//! event listener can poll this ledger through [`ChainReader`] exactly as
//! it polls a node.

use alloy::primitives::{keccak256, Address, Log as PrimitiveLog, LogData, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::blockchain::{BlockchainResult, ChainReader};
use crate::ledger::contract::{
    PayeeAdded, PayeeDeactivated, PayeeUpdated, PaymentRequestCreated, PaymentSettled,
    PayrollTriggered, RevenueThresholdUpdated, TreasuryFunded,
};
use crate::ledger::types::{
    LedgerError, LedgerReceipt, LedgerResult, Payee, PaymentRequest, PayrollRun,
};
use crate::ledger::PayrollLedger;

/// Default minimum spacing between two payroll triggers.
pub const DEFAULT_MIN_CHECK_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Source of "now" in unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct State {
    payees: HashMap<Address, Payee>,
    /// Registration order, for stable `get_active_payees` output.
    order: Vec<Address>,
    requests: BTreeMap<u64, PaymentRequest>,
    next_request_id: u64,
    balance: U256,
    revenue_threshold: U256,
    last_revenue_check: u64,
    block: u64,
    block_timestamps: HashMap<u64, u64>,
    logs: Vec<Log>,
}

impl State {
    /// Mine a block holding `events` and return its receipt.
    fn mine(&mut self, ledger: Address, now: u64, events: Vec<LogData>) -> LedgerReceipt {
        self.block += 1;
        let block = self.block;
        self.block_timestamps.insert(block, now);

        let mut preimage = ledger.to_vec();
        preimage.extend_from_slice(&block.to_be_bytes());
        let tx_hash = keccak256(&preimage);

        let first_index = self.logs.len() as u64;
        for (i, data) in events.into_iter().enumerate() {
            self.logs.push(Log {
                inner: PrimitiveLog {
                    address: ledger,
                    data,
                },
                block_number: Some(block),
                block_timestamp: Some(now),
                transaction_hash: Some(tx_hash),
                transaction_index: Some(0),
                log_index: Some(first_index + i as u64),
                ..Default::default()
            });
        }

        LedgerReceipt {
            tx_hash,
            block_number: Some(block),
        }
    }
}

/// Builder for [`InMemoryLedger`].
pub struct InMemoryLedgerBuilder {
    address: Address,
    facilitator: Address,
    caller: Option<Address>,
    clock: Arc<dyn Clock>,
    min_check_interval: u64,
    initial_balance: U256,
}

impl InMemoryLedgerBuilder {
    pub fn address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    /// Address the ledger accepts `markPaymentSettled` from.
    pub fn facilitator(mut self, facilitator: Address) -> Self {
        self.facilitator = facilitator;
        self
    }

    /// Address this handle settles as. Defaults to the facilitator.
    pub fn caller(mut self, caller: Address) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn min_check_interval(mut self, secs: u64) -> Self {
        self.min_check_interval = secs;
        self
    }

    pub fn balance(mut self, balance: U256) -> Self {
        self.initial_balance = balance;
        self
    }

    pub fn build(self) -> InMemoryLedger {
        let state = State {
            next_request_id: 1,
            balance: self.initial_balance,
            ..State::default()
        };
        InMemoryLedger {
            address: self.address,
            facilitator: self.facilitator,
            caller: self.caller.unwrap_or(self.facilitator),
            clock: self.clock,
            min_check_interval: self.min_check_interval,
            state: Arc::new(Mutex::new(state)),
        }
    }
}

/// Executable model of the payroll ledger.
#[derive(Clone)]
pub struct InMemoryLedger {
    address: Address,
    facilitator: Address,
    caller: Address,
    clock: Arc<dyn Clock>,
    min_check_interval: u64,
    state: Arc<Mutex<State>>,
}

impl InMemoryLedger {
    pub fn builder() -> InMemoryLedgerBuilder {
        InMemoryLedgerBuilder {
            address: Address::repeat_byte(0x4c),
            facilitator: Address::repeat_byte(0xfa),
            caller: None,
            clock: Arc::new(SystemClock),
            min_check_interval: DEFAULT_MIN_CHECK_INTERVAL_SECS,
            initial_balance: U256::ZERO,
        }
    }

    /// A handle on the same state that settles as `caller`.
    pub fn acting_as(&self, caller: Address) -> Self {
        Self {
            caller,
            ..self.clone()
        }
    }

    pub fn facilitator(&self) -> Address {
        self.facilitator
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Writes validate before mutating, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn validate_new_payee(state: &State, payee: Address, salary: U256) -> LedgerResult<()> {
        if payee == Address::ZERO {
            return Err(LedgerError::InvalidAddress);
        }
        if salary.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        if state.payees.contains_key(&payee) {
            return Err(LedgerError::PayeeAlreadyExists(payee));
        }
        Ok(())
    }

    fn insert_payee(state: &mut State, payee: Address, salary: U256, now: u64) {
        state.payees.insert(
            payee,
            Payee {
                wallet: payee,
                salary,
                last_payment: now,
                active: true,
            },
        );
        state.order.push(payee);
    }

    /// Number of pseudo-blocks mined so far.
    pub fn block_number(&self) -> u64 {
        self.state().block
    }

    /// Every log emitted so far, in block order.
    pub fn emitted_logs(&self) -> Vec<Log> {
        self.state().logs.clone()
    }
}

#[async_trait]
impl PayrollLedger for InMemoryLedger {
    fn address(&self) -> Address {
        self.address
    }

    async fn add_payee(&self, payee: Address, salary: U256) -> LedgerResult<LedgerReceipt> {
        let now = self.clock.now();
        let mut state = self.state();
        Self::validate_new_payee(&state, payee, salary)?;
        Self::insert_payee(&mut state, payee, salary, now);
        let event = PayeeAdded { payee, salary }.encode_log_data();
        Ok(state.mine(self.address, now, vec![event]))
    }

    async fn add_payees(&self, payees: &[Address], salaries: &[U256]) -> LedgerResult<LedgerReceipt> {
        if payees.len() != salaries.len() {
            return Err(LedgerError::ArrayLengthMismatch);
        }
        let now = self.clock.now();
        let mut state = self.state();

        for (i, (payee, salary)) in payees.iter().zip(salaries).enumerate() {
            Self::validate_new_payee(&state, *payee, *salary)?;
            if payees[..i].contains(payee) {
                return Err(LedgerError::PayeeAlreadyExists(*payee));
            }
        }

        let mut events = Vec::with_capacity(payees.len());
        for (payee, salary) in payees.iter().zip(salaries) {
            Self::insert_payee(&mut state, *payee, *salary, now);
            events.push(
                PayeeAdded {
                    payee: *payee,
                    salary: *salary,
                }
                .encode_log_data(),
            );
        }
        Ok(state.mine(self.address, now, events))
    }

    async fn update_payee_salary(&self, payee: Address, new_salary: U256) -> LedgerResult<LedgerReceipt> {
        if new_salary.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        let now = self.clock.now();
        let mut state = self.state();
        let entry = state
            .payees
            .get_mut(&payee)
            .filter(|p| p.active)
            .ok_or(LedgerError::PayeeNotFound(payee))?;
        let old_salary = std::mem::replace(&mut entry.salary, new_salary);

        let event = PayeeUpdated {
            payee,
            oldSalary: old_salary,
            newSalary: new_salary,
        }
        .encode_log_data();
        Ok(state.mine(self.address, now, vec![event]))
    }

    async fn deactivate_payee(&self, payee: Address) -> LedgerResult<LedgerReceipt> {
        let now = self.clock.now();
        let mut state = self.state();
        let entry = state
            .payees
            .get_mut(&payee)
            .filter(|p| p.active)
            .ok_or(LedgerError::PayeeNotFound(payee))?;
        entry.active = false;

        let event = PayeeDeactivated { payee }.encode_log_data();
        Ok(state.mine(self.address, now, vec![event]))
    }

    async fn create_payment_requests(&self) -> LedgerResult<PayrollRun> {
        let now = self.clock.now();
        let mut state = self.state();

        let due: Vec<(Address, U256)> = state
            .order
            .iter()
            .filter_map(|addr| state.payees.get(addr))
            .filter(|p| p.is_due(now))
            .map(|p| (p.wallet, p.salary))
            .collect();

        let required = due.iter().fold(U256::ZERO, |acc, (_, s)| acc.saturating_add(*s));
        if required > state.balance {
            return Err(LedgerError::InsufficientBalance {
                required,
                available: state.balance,
            });
        }

        let mut request_ids = Vec::with_capacity(due.len());
        let mut events = Vec::with_capacity(due.len() + 1);
        for (payee, amount) in &due {
            let request_id = state.next_request_id;
            state.next_request_id += 1;
            state.requests.insert(
                request_id,
                PaymentRequest {
                    request_id,
                    payee: *payee,
                    amount: *amount,
                    created_at: now,
                    settlement_id: B256::ZERO,
                    settled: false,
                },
            );
            if let Some(p) = state.payees.get_mut(payee) {
                p.last_payment = now;
            }
            request_ids.push(request_id);
            events.push(
                PaymentRequestCreated {
                    requestId: U256::from(request_id),
                    payee: *payee,
                    amount: *amount,
                }
                .encode_log_data(),
            );
        }
        state.last_revenue_check = now;

        if !due.is_empty() {
            events.push(
                PayrollTriggered {
                    totalAmount: required,
                    payeeCount: U256::from(due.len()),
                }
                .encode_log_data(),
            );
        }

        let receipt = state.mine(self.address, now, events);
        Ok(PayrollRun {
            request_ids,
            total_amount: required,
            receipt,
        })
    }

    async fn mark_payment_settled(
        &self,
        request_id: u64,
        settlement_id: B256,
        tx_hash: B256,
    ) -> LedgerResult<LedgerReceipt> {
        if self.caller != self.facilitator {
            return Err(LedgerError::OnlyX402Facilitator);
        }
        let now = self.clock.now();
        let mut state = self.state();
        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or(LedgerError::PaymentRequestNotFound(request_id))?;
        if request.settled {
            return Err(LedgerError::PaymentAlreadySettled(request_id));
        }
        request.settled = true;
        request.settlement_id = settlement_id;

        let event = PaymentSettled {
            requestId: U256::from(request_id),
            settlementId: settlement_id,
            txHash: tx_hash,
        }
        .encode_log_data();
        Ok(state.mine(self.address, now, vec![event]))
    }

    async fn fund_treasury(&self, amount: U256) -> LedgerResult<LedgerReceipt> {
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        let now = self.clock.now();
        let mut state = self.state();
        state.balance = state.balance.saturating_add(amount);

        let event = TreasuryFunded {
            from: self.caller,
            amount,
        }
        .encode_log_data();
        Ok(state.mine(self.address, now, vec![event]))
    }

    async fn set_revenue_threshold(&self, threshold: U256) -> LedgerResult<LedgerReceipt> {
        let now = self.clock.now();
        let mut state = self.state();
        let old = std::mem::replace(&mut state.revenue_threshold, threshold);

        let event = RevenueThresholdUpdated {
            oldThreshold: old,
            newThreshold: threshold,
        }
        .encode_log_data();
        Ok(state.mine(self.address, now, vec![event]))
    }

    async fn get_active_payees(&self) -> LedgerResult<Vec<Address>> {
        let state = self.state();
        Ok(state
            .order
            .iter()
            .filter(|addr| state.payees.get(*addr).is_some_and(|p| p.active))
            .copied()
            .collect())
    }

    async fn get_payee(&self, payee: Address) -> LedgerResult<Option<Payee>> {
        Ok(self.state().payees.get(&payee).cloned())
    }

    async fn get_payment_request(&self, request_id: u64) -> LedgerResult<Option<PaymentRequest>> {
        Ok(self.state().requests.get(&request_id).cloned())
    }

    async fn get_treasury_balance(&self) -> LedgerResult<U256> {
        Ok(self.state().balance)
    }

    async fn should_trigger_payroll(&self, current_revenue: U256) -> LedgerResult<bool> {
        let now = self.clock.now();
        let state = self.state();
        let interval_elapsed =
            now.saturating_sub(state.last_revenue_check) >= self.min_check_interval;
        Ok(current_revenue >= state.revenue_threshold && interval_elapsed)
    }

    async fn revenue_threshold(&self) -> LedgerResult<U256> {
        Ok(self.state().revenue_threshold)
    }
}

#[async_trait]
impl ChainReader for InMemoryLedger {
    async fn head_block(&self) -> BlockchainResult<u64> {
        Ok(self.state().block)
    }

    async fn logs(&self, address: Address, from_block: u64, to_block: u64) -> BlockchainResult<Vec<Log>> {
        let state = self.state();
        Ok(state
            .logs
            .iter()
            .filter(|log| log.address() == address)
            .filter(|log| {
                log.block_number
                    .is_some_and(|b| b >= from_block && b <= to_block)
            })
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, block_number: u64) -> BlockchainResult<u64> {
        Ok(self
            .state()
            .block_timestamps
            .get(&block_number)
            .copied()
            .unwrap_or_else(|| self.clock.now()))
    }
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("address", &self.address)
            .field("facilitator", &self.facilitator)
            .field("caller", &self.caller)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const START: u64 = 1_700_000_000;
    const ALICE: Address = address!("1111111111111111111111111111111111111111");
    const BOB: Address = address!("2222222222222222222222222222222222222222");

    fn ledger() -> (InMemoryLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let ledger = InMemoryLedger::builder().clock(clock.clone()).build();
        (ledger, clock)
    }

    #[tokio::test]
    async fn test_payee_validation() {
        let (ledger, _) = ledger();
        assert!(matches!(
            ledger.add_payee(Address::ZERO, U256::from(1)).await,
            Err(LedgerError::InvalidAddress)
        ));
        assert!(matches!(
            ledger.add_payee(ALICE, U256::ZERO).await,
            Err(LedgerError::ZeroAmount)
        ));
        assert!(matches!(
            ledger.add_payees(&[ALICE, BOB], &[U256::from(1)]).await,
            Err(LedgerError::ArrayLengthMismatch)
        ));
        assert!(matches!(
            ledger.update_payee_salary(BOB, U256::from(5)).await,
            Err(LedgerError::PayeeNotFound(p)) if p == BOB
        ));
        assert_eq!(ledger.block_number(), 0);
    }

    #[tokio::test]
    async fn test_add_payees_is_all_or_nothing() {
        let (ledger, _) = ledger();
        ledger.add_payee(BOB, U256::from(1)).await.unwrap();

        let err = ledger
            .add_payees(&[ALICE, BOB], &[U256::from(1), U256::from(2)])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PayeeAlreadyExists(p) if p == BOB));
        assert!(ledger.get_payee(ALICE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deactivated_payee_not_due() {
        let (ledger, clock) = ledger();
        ledger.add_payee(ALICE, U256::from(100)).await.unwrap();
        ledger.add_payee(BOB, U256::from(200)).await.unwrap();
        ledger.fund_treasury(U256::from(1_000)).await.unwrap();
        ledger.deactivate_payee(BOB).await.unwrap();

        clock.advance(PAY_PERIOD);
        let run = ledger.create_payment_requests().await.unwrap();
        assert_eq!(run.request_ids.len(), 1);
        assert_eq!(run.total_amount, U256::from(100));
        assert_eq!(ledger.get_active_payees().await.unwrap(), vec![ALICE]);
    }

    const PAY_PERIOD: u64 = crate::ledger::PAY_PERIOD_SECS;

    #[tokio::test]
    async fn test_payroll_not_due_before_period() {
        let (ledger, clock) = ledger();
        ledger.add_payee(ALICE, U256::from(100)).await.unwrap();
        ledger.fund_treasury(U256::from(1_000)).await.unwrap();

        clock.advance(PAY_PERIOD - 1);
        let run = ledger.create_payment_requests().await.unwrap();
        assert!(run.request_ids.is_empty());
        assert_eq!(run.total_amount, U256::ZERO);
    }

    #[tokio::test]
    async fn test_should_trigger_requires_both_factors() {
        let (ledger, clock) = ledger();
        ledger.set_revenue_threshold(U256::from(500)).await.unwrap();

        assert!(!ledger.should_trigger_payroll(U256::from(499)).await.unwrap());
        assert!(ledger.should_trigger_payroll(U256::from(500)).await.unwrap());

        // A payroll run resets the check interval.
        ledger.create_payment_requests().await.unwrap();
        assert!(!ledger.should_trigger_payroll(U256::from(10_000)).await.unwrap());

        clock.advance(DEFAULT_MIN_CHECK_INTERVAL_SECS);
        assert!(ledger.should_trigger_payroll(U256::from(10_000)).await.unwrap());
    }

    #[tokio::test]
    async fn test_settlement_requires_facilitator() {
        let (ledger, clock) = ledger();
        ledger.add_payee(ALICE, U256::from(100)).await.unwrap();
        ledger.fund_treasury(U256::from(100)).await.unwrap();
        clock.advance(PAY_PERIOD);
        let run = ledger.create_payment_requests().await.unwrap();
        let id = run.request_ids[0];

        let intruder = ledger.acting_as(BOB);
        assert!(matches!(
            intruder.mark_payment_settled(id, B256::ZERO, B256::ZERO).await,
            Err(LedgerError::OnlyX402Facilitator)
        ));
        assert!(!ledger.get_payment_request(id).await.unwrap().unwrap().settled);
    }

    #[tokio::test]
    async fn test_writes_emit_logs_in_blocks() {
        let (ledger, _) = ledger();
        ledger.add_payee(ALICE, U256::from(100)).await.unwrap();
        ledger.fund_treasury(U256::from(100)).await.unwrap();

        assert_eq!(ledger.head_block().await.unwrap(), 2);
        let logs = ledger.logs(ledger.address(), 2, 2).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].topic0(), Some(&TreasuryFunded::SIGNATURE_HASH));
        assert_eq!(ledger.block_timestamp(2).await.unwrap(), START);
        assert!(ledger.logs(Address::ZERO, 0, 10).await.unwrap().is_empty());
    }
}
