//! Error classification.
//!
//! Failures reach the core in many shapes: typed chain errors, reqwest
//! transport errors, wallet rejections with numeric codes, contract reverts
//! carrying ABI-encoded reasons, or plain strings from a collaborator. The
//! predicates here walk an error's `source()` chain, answer from the typed
//! layer when one is recognized, and only fall back to substring matching
//! for foreign errors.

use std::error::Error;

use alloy::sol_types::decode_revert_reason;

use crate::blockchain::BlockchainError;
use crate::error::SettlementError;
use crate::facilitator::client::is_transient_status;
use crate::facilitator::FacilitatorError;
use crate::ledger::{contract, LedgerError};
use crate::payments::signer::SignerError;

/// Selector of the standard `Error(string)` revert payload.
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// EIP-1193 "user rejected request".
pub const USER_REJECTED_CODE: i64 = 4001;

const NETWORK_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection refused",
    "connection reset",
    "econnrefused",
    "econnreset",
    "failed to fetch",
    "fetch failed",
    "dns error",
    "502 bad gateway",
    "503 service unavailable",
];

const CONTRACT_MARKERS: &[&str] = &[
    "execution reverted",
    "reverted",
    "call_exception",
    "call exception",
    "out of gas",
];

const WALLET_MARKERS: &[&str] = &[
    "user rejected",
    "user denied",
    "rejected the request",
    "action_rejected",
    "code 4001",
    "\"code\":4001",
];

/// Broad category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Network,
    Contract,
    Wallet,
    Other,
}

fn chain<'a>(err: &'a (dyn Error + 'static)) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(err), |&e| e.source())
}

fn contains_any(message: &str, markers: &[&str]) -> bool {
    let message = message.to_ascii_lowercase();
    markers.iter().any(|m| message.contains(m))
}

/// Typed answer for a single link of the chain. `None` means the link is
/// not one of ours (or defers to its source).
fn typed_category(err: &(dyn Error + 'static)) -> Option<Category> {
    if let Some(e) = err.downcast_ref::<BlockchainError>() {
        return Some(match e {
            BlockchainError::Rpc(_)
            | BlockchainError::Timeout(_)
            | BlockchainError::ConfirmationTimeout(_)
            | BlockchainError::NotAvailable(_) => Category::Network,
            BlockchainError::Reverted { .. } | BlockchainError::GasPriceTooHigh { .. } => {
                Category::Contract
            }
            BlockchainError::Wallet(_) => Category::Wallet,
            BlockchainError::ChainMismatch { .. } => Category::Other,
        });
    }

    if let Some(e) = err.downcast_ref::<LedgerError>() {
        return match e {
            LedgerError::Chain(_) => None,
            LedgerError::Configuration(_) => Some(Category::Other),
            _ => Some(Category::Contract),
        };
    }

    if let Some(e) = err.downcast_ref::<SignerError>() {
        return Some(match e {
            SignerError::Rejected { .. }
            | SignerError::Timeout(_)
            | SignerError::UnrecognizedChain(_)
            | SignerError::Failed(_) => Category::Wallet,
        });
    }

    if let Some(e) = err.downcast_ref::<FacilitatorError>() {
        return match e {
            FacilitatorError::Http(_) => None,
            FacilitatorError::Timeout(_) => Some(Category::Network),
            FacilitatorError::Status { status, .. } if is_transient_status(*status) => Some(Category::Network),
            _ => Some(Category::Other),
        };
    }

    if let Some(e) = err.downcast_ref::<SettlementError>() {
        return Some(match e {
            SettlementError::Network(_) => Category::Network,
            SettlementError::Contract { .. } => Category::Contract,
            SettlementError::WalletRejection(_) => Category::Wallet,
            _ => Category::Other,
        });
    }

    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        return Some(if e.is_timeout() || e.is_connect() || e.is_request() {
            Category::Network
        } else {
            Category::Other
        });
    }

    if let Some(e) = err.downcast_ref::<std::io::Error>() {
        use std::io::ErrorKind::*;
        // Other kinds carry free-form messages; let the substring pass see them.
        return match e.kind() {
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | TimedOut
            | BrokenPipe => Some(Category::Network),
            _ => None,
        };
    }

    None
}

fn fallback_category(err: &(dyn Error + 'static)) -> Category {
    let message = err.to_string();
    if contains_any(&message, WALLET_MARKERS) {
        Category::Wallet
    } else if contains_any(&message, CONTRACT_MARKERS) {
        Category::Contract
    } else if contains_any(&message, NETWORK_MARKERS) {
        Category::Network
    } else {
        Category::Other
    }
}

fn has_category(err: &(dyn Error + 'static), wanted: Category) -> bool {
    chain(err).any(|link| match typed_category(link) {
        Some(category) => category == wanted,
        None => link.source().is_none() && fallback_category(link) == wanted,
    })
}

/// Transport failure: unreachable RPC, facilitator timeout, dropped connection.
pub fn is_network_error(err: &(dyn Error + 'static)) -> bool {
    has_category(err, Category::Network)
}

/// On-chain revert or a typed ledger rule violation.
pub fn is_contract_error(err: &(dyn Error + 'static)) -> bool {
    has_category(err, Category::Contract)
}

/// Signature refused or abandoned in the wallet.
pub fn is_wallet_error(err: &(dyn Error + 'static)) -> bool {
    has_category(err, Category::Wallet)
}

/// Most specific category: wallet, then contract, then network.
pub fn classify(err: &(dyn Error + 'static)) -> Category {
    if is_wallet_error(err) {
        Category::Wallet
    } else if is_contract_error(err) {
        Category::Contract
    } else if is_network_error(err) {
        Category::Network
    } else {
        Category::Other
    }
}

/// Decode a revert reason from raw call data: ledger custom errors first,
/// then the standard `Error(string)` payload. Never panics on bad input.
pub fn decode_revert_data(data: &[u8]) -> Option<String> {
    if let Some(err) = contract::decode_ledger_error(data) {
        return Some(err.to_string());
    }
    if data.len() < 4 || data[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    decode_revert_reason(data).filter(|r| !r.is_empty())
}

/// Pull a reason out of a node message such as
/// `execution reverted: Payment already settled`.
pub fn reason_from_message(message: &str) -> Option<String> {
    const PREFIXES: &[&str] = &["reverted with reason string '", "execution reverted: "];
    PREFIXES.iter().find_map(|prefix| {
        let start = message.find(prefix)? + prefix.len();
        let rest = &message[start..];
        let reason = rest.split('\'').next().unwrap_or(rest).trim();
        (!reason.is_empty()).then(|| reason.to_string())
    })
}

/// Best-effort revert reason for a contract error.
pub fn revert_reason(err: &(dyn Error + 'static)) -> Option<String> {
    for link in chain(err) {
        if let Some(ledger) = link.downcast_ref::<LedgerError>() {
            if !matches!(ledger, LedgerError::Chain(_) | LedgerError::Reverted(_)) {
                return Some(ledger.to_string());
            }
        }
        if let Some(data) = link.downcast_ref::<BlockchainError>().and_then(|e| e.revert_data()) {
            if let Some(reason) = decode_revert_data(data) {
                return Some(reason);
            }
        }
        if let Some(SettlementError::Contract { reason: Some(reason), .. }) =
            link.downcast_ref::<SettlementError>()
        {
            return Some(reason.clone());
        }
    }
    chain(err).find_map(|link| reason_from_message(&link.to_string()))
}

/// Human-readable text for any failure.
pub fn user_friendly_message(err: &(dyn Error + 'static)) -> String {
    match classify(err) {
        Category::Wallet => {
            if contains_any(&err.to_string(), &["timeout", "timed out"]) {
                "The signature request timed out. Please try again.".to_string()
            } else {
                "The request was rejected in the wallet.".to_string()
            }
        }
        Category::Contract => match revert_reason(err) {
            Some(reason) => format!("Transaction failed: {}", reason),
            None => "Transaction failed on-chain. Please check the inputs and try again."
                .to_string(),
        },
        Category::Network => {
            "Network error. Please check the connection and try again.".to_string()
        }
        Category::Other => match err.downcast_ref::<SettlementError>() {
            Some(settlement) => settlement.to_string(),
            None => "An unexpected error occurred. Please try again.".to_string(),
        },
    }
}
