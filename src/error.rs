//! Settlement error taxonomy.
//!
//! Every failure a settlement flow can end in maps onto one of these
//! variants. Subsystem errors (`LedgerError`, `FacilitatorError`,
//! `SignerError`, ...) are converted at the orchestrator boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Uniform failure kinds surfaced to callers and serialized in results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidChallenge,
    ChainSwitch,
    VerificationFailed,
    SettlementFailed,
    LedgerReconciliationFailed,
    Network,
    Contract,
    WalletRejection,
    Configuration,
    InFlight,
}

impl ErrorKind {
    /// Whether retrying the same operation later can succeed.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network
                | ErrorKind::SettlementFailed
                | ErrorKind::LedgerReconciliationFailed
                | ErrorKind::InFlight
        )
    }
}

/// Errors produced by the settlement orchestration core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettlementError {
    /// The challenge is missing required data. Indicates a caller defect.
    #[error("Invalid payment challenge: {0}")]
    InvalidChallenge(String),

    /// The signer could not be aligned with the offer's network.
    #[error("Chain switch failed: {0}")]
    ChainSwitch(String),

    /// The facilitator reported the authorization as invalid.
    #[error("Payment verification failed: {0}")]
    VerificationFailed(String),

    /// The facilitator did not report an explicit settlement.
    #[error("Payment settlement failed: {0}")]
    SettlementFailed(String),

    /// The payment settled but the ledger could not be updated.
    #[error("Ledger reconciliation failed: {0}")]
    LedgerReconciliationFailed(String),

    /// Transport-level failure talking to the chain or the facilitator.
    #[error("Network error: {0}")]
    Network(String),

    /// A contract call reverted.
    #[error("Contract error: {message}")]
    Contract { message: String, reason: Option<String> },

    /// The signer refused or never answered the signature request.
    #[error("Wallet rejected the request: {0}")]
    WalletRejection(String),

    /// Deployment defect such as a missing key or address.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Another settlement for the same request is still running.
    #[error("Settlement already in flight for {0}")]
    InFlight(String),
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::InvalidChallenge(_) => ErrorKind::InvalidChallenge,
            SettlementError::ChainSwitch(_) => ErrorKind::ChainSwitch,
            SettlementError::VerificationFailed(_) => ErrorKind::VerificationFailed,
            SettlementError::SettlementFailed(_) => ErrorKind::SettlementFailed,
            SettlementError::LedgerReconciliationFailed(_) => ErrorKind::LedgerReconciliationFailed,
            SettlementError::Network(_) => ErrorKind::Network,
            SettlementError::Contract { .. } => ErrorKind::Contract,
            SettlementError::WalletRejection(_) => ErrorKind::WalletRejection,
            SettlementError::Configuration(_) => ErrorKind::Configuration,
            SettlementError::InFlight(_) => ErrorKind::InFlight,
        }
    }

    /// Errors that indicate a deployment or caller defect rather than a
    /// runtime condition; the orchestrator raises these instead of
    /// returning them inside a result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SettlementError::InvalidChallenge(_) | SettlementError::Configuration(_)
        )
    }
}
