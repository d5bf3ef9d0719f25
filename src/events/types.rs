//! Decoded ledger events.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ledger::contract::{
    to_u64, PayeeAdded, PayeeDeactivated, PayeeUpdated, PaymentRequestCreated, PaymentSettled,
    PayrollTriggered, RevenueThresholdUpdated, TreasuryFunded,
};
use crate::ledger::types::u256_decimal;

/// Every event the ledger emits, plus a catch-all for foreign topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum LedgerEvent {
    PayeeAdded {
        payee: Address,
        #[serde(with = "u256_decimal")]
        salary: U256,
    },
    PayeeUpdated {
        payee: Address,
        #[serde(with = "u256_decimal")]
        old_salary: U256,
        #[serde(with = "u256_decimal")]
        new_salary: U256,
    },
    PayeeDeactivated {
        payee: Address,
    },
    PaymentRequestCreated {
        request_id: u64,
        payee: Address,
        #[serde(with = "u256_decimal")]
        amount: U256,
    },
    PaymentSettled {
        request_id: u64,
        settlement_id: B256,
        tx_hash: B256,
    },
    PayrollTriggered {
        #[serde(with = "u256_decimal")]
        total_amount: U256,
        payee_count: u64,
    },
    TreasuryFunded {
        from: Address,
        #[serde(with = "u256_decimal")]
        amount: U256,
    },
    RevenueThresholdUpdated {
        #[serde(with = "u256_decimal")]
        old_threshold: U256,
        #[serde(with = "u256_decimal")]
        new_threshold: U256,
    },
    Unknown {
        topic0: Option<B256>,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::PayeeAdded { .. } => "PayeeAdded",
            LedgerEvent::PayeeUpdated { .. } => "PayeeUpdated",
            LedgerEvent::PayeeDeactivated { .. } => "PayeeDeactivated",
            LedgerEvent::PaymentRequestCreated { .. } => "PaymentRequestCreated",
            LedgerEvent::PaymentSettled { .. } => "PaymentSettled",
            LedgerEvent::PayrollTriggered { .. } => "PayrollTriggered",
            LedgerEvent::TreasuryFunded { .. } => "TreasuryFunded",
            LedgerEvent::RevenueThresholdUpdated { .. } => "RevenueThresholdUpdated",
            LedgerEvent::Unknown { .. } => "Unknown",
        }
    }

    /// Decode `log` by its first topic. Foreign topics yield `Unknown`; a
    /// known topic with a malformed body is an error.
    pub fn decode(log: &Log) -> Result<Self, alloy::sol_types::Error> {
        let Some(topic0) = log.topic0().copied() else {
            return Ok(LedgerEvent::Unknown { topic0: None });
        };

        let event = match topic0 {
            t if t == PayeeAdded::SIGNATURE_HASH => {
                let e = log.log_decode::<PayeeAdded>()?.inner.data;
                LedgerEvent::PayeeAdded {
                    payee: e.payee,
                    salary: e.salary,
                }
            }
            t if t == PayeeUpdated::SIGNATURE_HASH => {
                let e = log.log_decode::<PayeeUpdated>()?.inner.data;
                LedgerEvent::PayeeUpdated {
                    payee: e.payee,
                    old_salary: e.oldSalary,
                    new_salary: e.newSalary,
                }
            }
            t if t == PayeeDeactivated::SIGNATURE_HASH => {
                let e = log.log_decode::<PayeeDeactivated>()?.inner.data;
                LedgerEvent::PayeeDeactivated { payee: e.payee }
            }
            t if t == PaymentRequestCreated::SIGNATURE_HASH => {
                let e = log.log_decode::<PaymentRequestCreated>()?.inner.data;
                LedgerEvent::PaymentRequestCreated {
                    request_id: to_u64(e.requestId),
                    payee: e.payee,
                    amount: e.amount,
                }
            }
            t if t == PaymentSettled::SIGNATURE_HASH => {
                let e = log.log_decode::<PaymentSettled>()?.inner.data;
                LedgerEvent::PaymentSettled {
                    request_id: to_u64(e.requestId),
                    settlement_id: e.settlementId,
                    tx_hash: e.txHash,
                }
            }
            t if t == PayrollTriggered::SIGNATURE_HASH => {
                let e = log.log_decode::<PayrollTriggered>()?.inner.data;
                LedgerEvent::PayrollTriggered {
                    total_amount: e.totalAmount,
                    payee_count: to_u64(e.payeeCount),
                }
            }
            t if t == TreasuryFunded::SIGNATURE_HASH => {
                let e = log.log_decode::<TreasuryFunded>()?.inner.data;
                LedgerEvent::TreasuryFunded {
                    from: e.from,
                    amount: e.amount,
                }
            }
            t if t == RevenueThresholdUpdated::SIGNATURE_HASH => {
                let e = log.log_decode::<RevenueThresholdUpdated>()?.inner.data;
                LedgerEvent::RevenueThresholdUpdated {
                    old_threshold: e.oldThreshold,
                    new_threshold: e.newThreshold,
                }
            }
            other => LedgerEvent::Unknown { topic0: Some(other) },
        };
        Ok(event)
    }
}

/// A decoded event with its chain position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEvent {
    pub name: &'static str,
    pub block_number: u64,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
    pub args: LedgerEvent,
    pub timestamp: DateTime<Utc>,
}

/// What a callback subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    Named(String),
    Any,
}

impl EventFilter {
    pub fn named(name: impl Into<String>) -> Self {
        EventFilter::Named(name.into())
    }

    pub fn matches(&self, event_name: &str) -> bool {
        match self {
            EventFilter::Any => true,
            EventFilter::Named(name) => name == event_name,
        }
    }
}

impl From<&str> for EventFilter {
    /// `"*"` is the wildcard.
    fn from(name: &str) -> Self {
        if name == "*" {
            EventFilter::Any
        } else {
            EventFilter::Named(name.to_string())
        }
    }
}
