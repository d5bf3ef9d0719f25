//! x402 payment facilitator subsystem.
//!
//! The facilitator is an external collaborator: it verifies signed payment
//! authorizations and settles them on-chain. This module only speaks its
//! wire protocol; availability is outside this system's control.

pub mod client;
pub mod types;

pub use client::{Facilitator, FacilitatorError, HttpFacilitator, X402_VERSION_HEADER};
pub use types::{
    ExactAuthorization, OfferExtra, PaymentChallenge, PaymentPayload, PaymentRequirements,
    SettleResponse, VerifyResponse, EVENT_SETTLED, SCHEME_EXACT, X402_VERSION,
};
