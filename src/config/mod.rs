//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → PayrollConfig (validated, immutable)
//!     → cloned into each service object at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Secrets never live in the file; only the names of the env vars do

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BlockchainConfig, FacilitatorConfig, LedgerConfig, ListenerConfig, NetworkConfig,
    ObservabilityConfig, PayrollConfig, RetryConfig, ServerConfig, TransactionConfig,
    WebhookConfig,
};
