//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! External call (RPC, facilitator, signer):
//!     → timeouts.rs (enforce a deadline)
//!     → On failure: classifier.rs (network / contract / wallet)
//!     → retries.rs (retry transient failures with backoff.rs delays)
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - Only transient network failures are retried automatically
//! - Wallet rejections are never retried

pub mod backoff;
pub mod classifier;
pub mod retries;
pub mod timeouts;

pub use classifier::{
    classify, is_contract_error, is_network_error, is_wallet_error, user_friendly_message,
    Category,
};
pub use retries::{with_retry, RetryPolicy};
pub use timeouts::with_timeout;
