//! Payroll ledger subsystem.
//!
//! # Data Flow
//! ```text
//! Admin API / Transaction Store
//!     → LedgerCall (serialisable write description)
//!     → PayrollLedger (trait)
//!         → client.rs (ContractLedger: eth_call simulation, sign, confirm)
//!         → memory.rs (InMemoryLedger: executable model, local runs and tests)
//! Payment Orchestrator
//!     → PayrollLedger::mark_payment_settled (facilitator-authorized)
//! ```
//!
//! # Invariants
//! - `PaymentRequest.settled` flips false to true exactly once
//! - `create_payment_requests` creates all due requests or none

pub mod client;
pub mod contract;
pub mod memory;
pub mod types;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::ContractLedger;
pub use memory::{Clock, InMemoryLedger, ManualClock, SystemClock};
pub use types::{
    LedgerError, LedgerReceipt, LedgerResult, Payee, PaymentRequest, PayrollRun, PAY_PERIOD_SECS,
};

use types::u256_decimal;

/// Operations the settlement core needs from the on-chain ledger.
#[async_trait]
pub trait PayrollLedger: Send + Sync {
    /// Address of the ledger contract.
    fn address(&self) -> Address;

    async fn add_payee(&self, payee: Address, salary: U256) -> LedgerResult<LedgerReceipt>;

    async fn add_payees(&self, payees: &[Address], salaries: &[U256]) -> LedgerResult<LedgerReceipt>;

    async fn update_payee_salary(&self, payee: Address, new_salary: U256) -> LedgerResult<LedgerReceipt>;

    async fn deactivate_payee(&self, payee: Address) -> LedgerResult<LedgerReceipt>;

    /// One request per payee whose last payment is at least a pay period old.
    /// Fails with `InsufficientBalance`, creating nothing, when the treasury
    /// cannot cover all of them.
    async fn create_payment_requests(&self) -> LedgerResult<PayrollRun>;

    /// Facilitator-only. Fails with `PaymentAlreadySettled` on a repeat.
    async fn mark_payment_settled(
        &self,
        request_id: u64,
        settlement_id: B256,
        tx_hash: B256,
    ) -> LedgerResult<LedgerReceipt>;

    /// Transfer `amount` of the asset into the ledger.
    async fn fund_treasury(&self, amount: U256) -> LedgerResult<LedgerReceipt>;

    async fn set_revenue_threshold(&self, threshold: U256) -> LedgerResult<LedgerReceipt>;

    async fn get_active_payees(&self) -> LedgerResult<Vec<Address>>;

    async fn get_payee(&self, payee: Address) -> LedgerResult<Option<Payee>>;

    async fn get_payment_request(&self, request_id: u64) -> LedgerResult<Option<PaymentRequest>>;

    async fn get_treasury_balance(&self) -> LedgerResult<U256>;

    /// Revenue at or above the threshold AND the minimum check interval elapsed.
    async fn should_trigger_payroll(&self, current_revenue: U256) -> LedgerResult<bool>;

    async fn revenue_threshold(&self) -> LedgerResult<U256>;
}

/// A ledger write, recorded so it can be re-executed on retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerCall {
    AddPayee {
        payee: Address,
        #[serde(with = "u256_decimal")]
        salary: U256,
    },
    AddPayees {
        payees: Vec<Address>,
        #[serde(with = "u256_decimal::vec")]
        salaries: Vec<U256>,
    },
    CreatePayments,
    FundTreasury {
        #[serde(with = "u256_decimal")]
        amount: U256,
    },
    UpdateThreshold {
        #[serde(with = "u256_decimal")]
        threshold: U256,
    },
    UpdateSalary {
        payee: Address,
        #[serde(with = "u256_decimal")]
        salary: U256,
    },
    DeactivatePayee {
        payee: Address,
    },
}

impl LedgerCall {
    /// Run this write against `ledger`.
    pub async fn execute(&self, ledger: &dyn PayrollLedger) -> LedgerResult<LedgerReceipt> {
        match self {
            LedgerCall::AddPayee { payee, salary } => ledger.add_payee(*payee, *salary).await,
            LedgerCall::AddPayees { payees, salaries } => ledger.add_payees(payees, salaries).await,
            LedgerCall::CreatePayments => Ok(ledger.create_payment_requests().await?.receipt),
            LedgerCall::FundTreasury { amount } => ledger.fund_treasury(*amount).await,
            LedgerCall::UpdateThreshold { threshold } => {
                ledger.set_revenue_threshold(*threshold).await
            }
            LedgerCall::UpdateSalary { payee, salary } => {
                ledger.update_payee_salary(*payee, *salary).await
            }
            LedgerCall::DeactivatePayee { payee } => ledger.deactivate_payee(*payee).await,
        }
    }

    /// Whether running the call a second time leaves the ledger as one run
    /// would. A repeat either reverts (payee already registered, nothing
    /// due) or rewrites the same value. Funding moves the asset again.
    pub fn is_repeatable(&self) -> bool {
        !matches!(self, LedgerCall::FundTreasury { .. })
    }

    /// Value moved by the call, if any.
    pub fn value(&self) -> Option<U256> {
        match self {
            LedgerCall::AddPayee { salary, .. } | LedgerCall::UpdateSalary { salary, .. } => {
                Some(*salary)
            }
            LedgerCall::FundTreasury { amount } => Some(*amount),
            LedgerCall::UpdateThreshold { threshold } => Some(*threshold),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn test_ledger_call_serialization() {
        let call = LedgerCall::UpdateSalary {
            payee: address!("1111111111111111111111111111111111111111"),
            salary: U256::from(3_000_000_000u64),
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["kind"], "update_salary");
        assert_eq!(json["salary"], "3000000000");

        let back: LedgerCall = serde_json::from_value(json).unwrap();
        assert_eq!(back, call);
        assert_eq!(back.value(), Some(U256::from(3_000_000_000u64)));
    }

    #[tokio::test]
    async fn test_execute_routes_to_ledger() {
        let clock = std::sync::Arc::new(ManualClock::new(1_700_000_000));
        let ledger = InMemoryLedger::builder().clock(clock).build();
        let payee = address!("2222222222222222222222222222222222222222");

        let receipt = LedgerCall::AddPayee {
            payee,
            salary: U256::from(10),
        }
        .execute(&ledger)
        .await
        .unwrap();
        assert!(receipt.block_number.is_some());
        assert_eq!(ledger.get_active_payees().await.unwrap(), vec![payee]);

        let err = LedgerCall::AddPayee {
            payee,
            salary: U256::from(10),
        }
        .execute(&ledger)
        .await
        .unwrap_err();
        assert!(matches!(err, LedgerError::PayeeAlreadyExists(p) if p == payee));
    }
}
