//! Payment settlement orchestration.
//!
//! # Data Flow
//! ```text
//! PaymentChallenge (HTTP 402 body)
//!     → orchestrator.rs (guard, already-paid check, align network)
//!     → authorization.rs (EIP-3009 authorization, EIP-712 signature, header)
//!     → Facilitator verify → settle
//!     → receipts.rs (record (payee, amount) receipt)
//!     → PayrollLedger::mark_payment_settled (when a requestId is referenced)
//! ```

pub mod authorization;
pub mod networks;
pub mod orchestrator;
pub mod receipts;
pub mod signer;
pub mod types;

pub use networks::NetworkRegistry;
pub use orchestrator::{fallback_settlement_id, request_payment_id, PaymentOrchestrator};
pub use receipts::{PaymentReceipt, PaymentReceipts};
pub use signer::{PaymentSigner, SignerError};
pub use types::{PaymentResult, SettlementStage};
