//! HTTP API of the settlement service.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (request id, tracing, timeout, metrics layers)
//!     → payments.rs (402 challenge, settlement)
//!     → webhooks.rs (bounded facilitator notification log)
//!     → status.rs (health, transaction snapshot)
//!     → admin (Bearer-protected ledger writes)
//!     → response.rs (uniform `{success: false, error, details}` failures)
//! ```

pub mod payments;
pub mod request;
pub mod response;
pub mod server;
pub mod status;
pub mod webhooks;

pub use request::X_REQUEST_ID;
pub use response::ApiError;
pub use server::{AppState, HttpServer};
pub use webhooks::{WebhookLog, WebhookNotification};
