//! Local transaction tracking.
//!
//! # Data Flow
//! ```text
//! Admin API
//!     → TransactionStore::track (pending record)
//!     → LedgerCall::execute (chain write)
//!     → confirmed (hash + block) | failed (user-facing message)
//! Retry loop
//!     → retry_failed_transactions → Resubmit → confirmed | failed
//! ```

pub mod store;
pub mod types;

pub use store::{
    LedgerResubmitter, Listener, Resubmit, RetrySummary, Subscription, TransactionStore,
    TransactionStoreError, STORAGE_KEY,
};
pub use types::{
    NewTransaction, Transaction, TransactionPatch, TransactionStatus, TransactionType, PENDING_HASH,
};
