//! Ledger event listening.
//!
//! # Data Flow
//! ```text
//! ChainReader::head_block
//!     → ChainReader::logs (last processed + 1 ..= head)
//!     → types.rs (LedgerEvent decoded by topic0, unknown/malformed skipped)
//!     → listener.rs (callbacks by name or wildcard, broadcast stream)
//!     → watermark advances to head
//! ```

pub mod listener;
pub mod types;

pub use listener::{ContractEventListener, ErrorCallback, EventCallback, EventSubscription, ListenerError};
pub use types::{ContractEvent, EventFilter, LedgerEvent};
