//! Transaction records tracked by the store.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::LedgerCall;

/// Hash placeholder until a submission is mined.
pub const PENDING_HASH: &str = "pending";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    AddPayee,
    CreatePayments,
    FundTreasury,
    UpdateThreshold,
    UpdateSalary,
    DeactivatePayee,
}

impl From<&LedgerCall> for TransactionType {
    fn from(call: &LedgerCall) -> Self {
        match call {
            LedgerCall::AddPayee { .. } | LedgerCall::AddPayees { .. } => TransactionType::AddPayee,
            LedgerCall::CreatePayments => TransactionType::CreatePayments,
            LedgerCall::FundTreasury { .. } => TransactionType::FundTreasury,
            LedgerCall::UpdateThreshold { .. } => TransactionType::UpdateThreshold,
            LedgerCall::UpdateSalary { .. } => TransactionType::UpdateSalary,
            LedgerCall::DeactivatePayee { .. } => TransactionType::DeactivatePayee,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
    Replaced,
}

/// A locally initiated on-chain action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    /// Transaction hash, or [`PENDING_HASH`] before submission is known.
    pub hash: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub from: Address,
    pub to: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    /// The last submission ended without an answer from the chain, so it may
    /// still have been mined.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub outcome_unknown: bool,
    /// Ledger call to run again on retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<LedgerCall>,
}

/// Fields supplied when a transaction is added.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub hash: Option<String>,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub from: Address,
    pub to: Address,
    pub value: Option<String>,
    pub call: Option<LedgerCall>,
}

impl NewTransaction {
    /// A pending record for `call`.
    pub fn pending(call: LedgerCall, from: Address, to: Address, value: Option<String>) -> Self {
        Self {
            hash: None,
            tx_type: TransactionType::from(&call),
            status: TransactionStatus::Pending,
            from,
            to,
            value,
            call: Some(call),
        }
    }
}

/// Partial update merged into an existing record. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub hash: Option<String>,
    pub status: Option<TransactionStatus>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub block_number: Option<u64>,
    /// `Some(None)` clears the error.
    pub error: Option<Option<String>>,
    pub retry_count: Option<u32>,
    pub outcome_unknown: Option<bool>,
}

impl TransactionPatch {
    pub fn confirmed(hash: String, block_number: u64) -> Self {
        Self {
            hash: Some(hash),
            status: Some(TransactionStatus::Confirmed),
            confirmed_at: Some(Utc::now()),
            block_number: Some(block_number),
            error: Some(None),
            outcome_unknown: Some(false),
            ..Self::default()
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: Some(TransactionStatus::Failed),
            error: Some(Some(error)),
            outcome_unknown: Some(false),
            ..Self::default()
        }
    }

    /// Failed without a verdict from the chain.
    pub fn unconfirmed(error: String) -> Self {
        Self {
            outcome_unknown: Some(true),
            ..Self::failed(error)
        }
    }

    pub(crate) fn apply(self, tx: &mut Transaction) {
        if let Some(hash) = self.hash {
            tx.hash = hash;
        }
        if let Some(status) = self.status {
            tx.status = status;
        }
        if let Some(at) = self.confirmed_at {
            tx.confirmed_at = Some(at);
        }
        if let Some(block) = self.block_number {
            tx.block_number = Some(block);
        }
        if let Some(error) = self.error {
            tx.error = error;
        }
        if let Some(count) = self.retry_count {
            tx.retry_count = count;
        }
        if let Some(unknown) = self.outcome_unknown {
            tx.outcome_unknown = unknown;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    #[test]
    fn test_type_from_call() {
        let call = LedgerCall::AddPayees {
            payees: vec![Address::ZERO],
            salaries: vec![U256::from(1)],
        };
        assert_eq!(TransactionType::from(&call), TransactionType::AddPayee);
        assert_eq!(
            TransactionType::from(&LedgerCall::CreatePayments),
            TransactionType::CreatePayments
        );
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{
            "id": "tx-1",
            "hash": "pending",
            "type": "fund_treasury",
            "status": "failed",
            "from": "0x0000000000000000000000000000000000000001",
            "to": "0x0000000000000000000000000000000000000002",
            "timestamp": "2025-01-01T00:00:00.123Z",
            "retryCount": 2,
            "error": "boom",
            "gasUsed": "21000"
        }"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.tx_type, TransactionType::FundTreasury);
        assert_eq!(tx.retry_count, 2);
        assert_eq!(tx.timestamp.timestamp_subsec_millis(), 123);
        assert!(tx.call.is_none());
        assert!(!tx.outcome_unknown);
    }

    #[test]
    fn test_patch_clears_error() {
        let mut tx: Transaction = serde_json::from_str(
            r#"{"id":"a","hash":"pending","type":"add_payee","status":"failed",
                "from":"0x0000000000000000000000000000000000000001",
                "to":"0x0000000000000000000000000000000000000002",
                "timestamp":"2025-01-01T00:00:00Z","error":"boom"}"#,
        )
        .unwrap();
        TransactionPatch {
            status: Some(TransactionStatus::Pending),
            error: Some(None),
            retry_count: Some(1),
            ..TransactionPatch::default()
        }
        .apply(&mut tx);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.error.is_none());
        assert_eq!(tx.retry_count, 1);
    }

    #[test]
    fn test_unconfirmed_is_cleared_by_confirmation() {
        let mut tx: Transaction = serde_json::from_str(
            r#"{"id":"a","hash":"pending","type":"fund_treasury","status":"pending",
                "from":"0x0000000000000000000000000000000000000001",
                "to":"0x0000000000000000000000000000000000000002",
                "timestamp":"2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        TransactionPatch::unconfirmed("no receipt".to_string()).apply(&mut tx);
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert!(tx.outcome_unknown);
        assert_eq!(serde_json::to_value(&tx).unwrap()["outcomeUnknown"], true);

        TransactionPatch::confirmed("0xab".to_string(), 9).apply(&mut tx);
        assert!(!tx.outcome_unknown);
        assert!(serde_json::to_value(&tx).unwrap().get("outcomeUnknown").is_none());
    }
}
