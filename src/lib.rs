//! x402 payroll settlement service library.

pub mod admin;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod events;
pub mod facilitator;
pub mod http;
pub mod ledger;
pub mod lifecycle;
pub mod observability;
pub mod payments;
pub mod resilience;
pub mod transactions;

pub use config::schema::PayrollConfig;
pub use error::{ErrorKind, SettlementError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
