//! API error responses.
//!
//! Every failure leaves the service as `{success: false, error, details}`
//! with a status code chosen from the failure kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::error::{ErrorKind, SettlementError};
use crate::ledger::LedgerError;
use crate::resilience::classifier::user_friendly_message;

/// A failed API call.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub details: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub fn unavailable(error: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.error,
            "details": self.details,
        });
        (self.status, Json(body)).into_response()
    }
}

/// Status for a settlement failure kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidChallenge | ErrorKind::ChainSwitch | ErrorKind::WalletRejection => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::VerificationFailed => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::InFlight => StatusCode::CONFLICT,
        ErrorKind::Configuration => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::SettlementFailed
        | ErrorKind::LedgerReconciliationFailed
        | ErrorKind::Network
        | ErrorKind::Contract => StatusCode::BAD_GATEWAY,
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        let kind = err.kind();
        ApiError::new(status_for(kind), err.to_string()).with_details(json!({ "kind": kind }))
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let status = match &err {
            LedgerError::PaymentRequestNotFound(_) | LedgerError::PayeeNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InvalidAddress | LedgerError::ZeroAmount | LedgerError::ArrayLengthMismatch => {
                StatusCode::BAD_REQUEST
            }
            LedgerError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, user_friendly_message(&err)).with_details(json!({ "cause": err.to_string() }))
    }
}
