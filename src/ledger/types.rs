//! Ledger domain types and errors.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blockchain::BlockchainError;

/// Seconds a payee must wait between two payroll payments.
pub const PAY_PERIOD_SECS: u64 = 30 * 24 * 60 * 60;

/// A registered payee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payee {
    pub wallet: Address,
    #[serde(with = "u256_decimal")]
    pub salary: U256,
    /// Unix seconds of the last payroll that included this payee.
    pub last_payment: u64,
    pub active: bool,
}

impl Payee {
    /// Whether a full pay period has elapsed at `now`.
    pub fn is_due(&self, now: u64) -> bool {
        self.active && now.saturating_sub(self.last_payment) >= PAY_PERIOD_SECS
    }
}

/// A ledger-owned payment request. `settled` only ever flips false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub request_id: u64,
    pub payee: Address,
    #[serde(with = "u256_decimal")]
    pub amount: U256,
    pub created_at: u64,
    pub settlement_id: B256,
    pub settled: bool,
}

/// Proof that a ledger write was mined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
}

/// Outcome of `createPaymentRequests`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollRun {
    pub request_ids: Vec<u64>,
    #[serde(with = "u256_decimal")]
    pub total_amount: U256,
    pub receipt: LedgerReceipt,
}

/// Errors surfaced by a ledger implementation. Contract custom errors map
/// one-to-one onto the typed variants.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Payee {0} already exists")]
    PayeeAlreadyExists(Address),

    #[error("Payee {0} not found")]
    PayeeNotFound(Address),

    #[error("Invalid address")]
    InvalidAddress,

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Payee and salary arrays differ in length")]
    ArrayLengthMismatch,

    #[error("Insufficient treasury balance: required {required}, available {available}")]
    InsufficientBalance { required: U256, available: U256 },

    #[error("Only the x402 facilitator can settle payments")]
    OnlyX402Facilitator,

    #[error("Caller {0} is not authorized")]
    Unauthorized(Address),

    #[error("Payment request {0} is already settled")]
    PaymentAlreadySettled(u64),

    #[error("Payment request {0} not found")]
    PaymentRequestNotFound(u64),

    /// Missing key, address or other deployment defect.
    #[error("Ledger configuration error: {0}")]
    Configuration(String),

    /// Revert that did not match a known custom error.
    #[error("Ledger call reverted: {0}")]
    Reverted(String),

    #[error("Failed to decode ledger response: {0}")]
    Decode(String),

    #[error("Chain error: {0}")]
    Chain(#[from] BlockchainError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Serde helper: `U256` as a decimal string. Accepts decimal or `0x` hex
/// strings, and plain JSON integers, on input.
pub mod u256_decimal {
    use alloy::primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(U256::from(n)),
            Raw::Text(s) => parse(&s).map_err(de::Error::custom),
        }
    }

    /// Parse a decimal or `0x`-prefixed hex amount.
    pub fn parse(s: &str) -> Result<U256, String> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x") {
            Some(hex) => U256::from_str_radix(hex, 16),
            None => U256::from_str_radix(s, 10),
        };
        parsed.map_err(|e| format!("invalid amount '{}': {}", s, e))
    }

    /// Lists of amounts.
    pub mod vec {
        use alloy::primitives::U256;
        use serde::ser::SerializeSeq;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(values: &[U256], serializer: S) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(Some(values.len()))?;
            for value in values {
                seq.serialize_element(&value.to_string())?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<U256>, D::Error> {
            #[derive(Deserialize)]
            struct Item(#[serde(with = "super")] U256);

            Ok(Vec::<Item>::deserialize(deserializer)?
                .into_iter()
                .map(|Item(v)| v)
                .collect())
        }
    }
}
