//! x402 wire types: challenges, payment payloads, facilitator responses.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::ledger::types::u256_decimal;

/// x402 protocol version spoken by this service.
pub const X402_VERSION: u32 = 1;

/// The only payment scheme honored.
pub const SCHEME_EXACT: &str = "exact";

/// Facilitator settle event that counts as success.
pub const EVENT_SETTLED: &str = "payment.settled";

/// Body of an HTTP 402 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    #[serde(rename = "x402Version", alias = "protocolVersion")]
    pub protocol_version: u32,

    #[serde(rename = "accepts", alias = "offers")]
    pub offers: Vec<PaymentRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaymentChallenge {
    pub fn new(offer: PaymentRequirements) -> Self {
        Self {
            protocol_version: X402_VERSION,
            offers: vec![offer],
            error: Some("Payment required".to_string()),
        }
    }

    /// The offer this system honors: the first one.
    pub fn offer(&self) -> Option<&PaymentRequirements> {
        self.offers.first()
    }
}

/// One payment offer ("payment requirements" in x402 terms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    pub asset: Address,
    pub pay_to: Address,
    #[serde(with = "u256_decimal")]
    pub max_amount_required: U256,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    pub max_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub extra: OfferExtra,
}

fn default_mime_type() -> String {
    "application/json".to_string()
}

/// `extra` block of an offer. Unknown keys are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,

    /// EIP-712 domain name of the asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// EIP-712 domain version of the asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl OfferExtra {
    /// Ledger request id, when the offer references one.
    pub fn ledger_request_id(&self) -> Option<u64> {
        self.request_id.as_deref().and_then(|id| id.trim().parse().ok())
    }
}

/// Signed EIP-3009 authorization as carried in the payment header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactAuthorization {
    pub from: Address,
    pub to: Address,
    #[serde(with = "u256_decimal")]
    pub value: U256,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: B256,
    pub signature: Bytes,
    pub asset: Address,
}

/// Decoded payment header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: ExactAuthorization,
}

/// Body sent to both facilitator endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorRequest<'a> {
    pub x402_version: u32,
    pub payment_header: &'a str,
    pub payment_requirements: &'a PaymentRequirements,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    #[serde(default)]
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SettleResponse {
    /// Transaction hash of an explicit settlement. Anything other than a
    /// `payment.settled` event carrying a well-formed hash is not a settlement.
    pub fn settled_tx_hash(&self) -> Option<B256> {
        if self.event != EVENT_SETTLED {
            return None;
        }
        self.tx_hash.as_deref()?.parse().ok()
    }

    /// Facilitator-provided settlement id, if it is a 32-byte hex value.
    pub fn settlement_id(&self) -> Option<B256> {
        self.settlement_id.as_deref()?.parse().ok()
    }

    /// Human-readable reason for a non-settlement.
    pub fn failure_reason(&self) -> String {
        match (&self.error, self.event.as_str()) {
            (Some(error), _) => error.clone(),
            (None, "") => "facilitator returned no settlement event".to_string(),
            (None, EVENT_SETTLED) => "settlement reported without a transaction hash".to_string(),
            (None, event) => format!("facilitator reported {}", event),
        }
    }
}
