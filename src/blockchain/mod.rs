//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! Environment Variables (private keys, named in config)
//!     → wallet.rs (key loading, signing, active chain)
//!     → client.rs (RPC connection with timeouts and failover)
//!     → transaction.rs (build, sign, broadcast, confirm)
//! ```
//!
//! # Security Constraints
//! - Private keys ONLY from environment variables
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts

pub mod client;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use client::{BlockchainClient, ChainReader};
pub use transaction::TxBuilder;
pub use types::{BlockchainConfig, BlockchainError, BlockchainResult, ChainId, ConfirmationStatus};
pub use wallet::Wallet;
