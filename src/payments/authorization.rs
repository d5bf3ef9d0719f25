//! EIP-3009 payment authorizations and the x402 payment header.
//!
//! An authorization binds `{from, payTo, value, validBefore}` to a single
//! asset through its EIP-712 domain and is redeemable once per nonce.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::borrow::Cow;

use crate::error::SettlementError;
use crate::facilitator::{ExactAuthorization, PaymentPayload, PaymentRequirements, SCHEME_EXACT, X402_VERSION};
use crate::payments::signer::{PaymentSigner, SignerError};

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

/// EIP-712 domain of the settlement asset.
pub fn asset_domain(name: &str, version: &str, chain_id: u64, asset: Address) -> Eip712Domain {
    Eip712Domain::new(
        Some(Cow::Owned(name.to_string())),
        Some(Cow::Owned(version.to_string())),
        Some(U256::from(chain_id)),
        Some(asset),
        None,
    )
}

/// Unsigned authorization for `offer`, valid from issuance for exactly
/// `maxTimeoutSeconds`.
pub fn authorization_for(from: Address, offer: &PaymentRequirements, issued_at: u64) -> TransferWithAuthorization {
    TransferWithAuthorization {
        from,
        to: offer.pay_to,
        value: offer.max_amount_required,
        validAfter: U256::ZERO,
        validBefore: U256::from(issued_at.saturating_add(offer.max_timeout_seconds)),
        nonce: B256::from(rand::random::<[u8; 32]>()),
    }
}

/// Sign `auth` under `domain` and wrap it as the header payload.
pub async fn sign_authorization(
    signer: &dyn PaymentSigner,
    auth: &TransferWithAuthorization,
    domain: &Eip712Domain,
    network: &str,
    asset: Address,
) -> Result<PaymentPayload, SignerError> {
    let hash = auth.eip712_signing_hash(domain);
    let signature = signer.sign_hash(hash).await?;

    Ok(PaymentPayload {
        x402_version: X402_VERSION,
        scheme: SCHEME_EXACT.to_string(),
        network: network.to_string(),
        payload: ExactAuthorization {
            from: auth.from,
            to: auth.to,
            value: auth.value,
            valid_after: auth.validAfter.saturating_to(),
            valid_before: auth.validBefore.saturating_to(),
            nonce: auth.nonce,
            signature: Bytes::from(signature.as_bytes().to_vec()),
            asset,
        },
    })
}

/// Authorization struct carried by a decoded payload.
pub fn authorization_of(payload: &ExactAuthorization) -> TransferWithAuthorization {
    TransferWithAuthorization {
        from: payload.from,
        to: payload.to,
        value: payload.value,
        validAfter: U256::from(payload.valid_after),
        validBefore: U256::from(payload.valid_before),
        nonce: payload.nonce,
    }
}

/// Address that signed `payload` under `domain`, if the signature parses.
pub fn recover_signer(payload: &ExactAuthorization, domain: &Eip712Domain) -> Option<Address> {
    let hash = authorization_of(payload).eip712_signing_hash(domain);
    let signature = alloy::primitives::Signature::try_from(payload.signature.as_ref()).ok()?;
    signature.recover_address_from_prehash(&hash).ok()
}

/// Base64 JSON encoding used in the `X-PAYMENT` header.
pub fn encode_header(payload: &PaymentPayload) -> Result<String, SettlementError> {
    let json = serde_json::to_vec(payload)
        .map_err(|e| SettlementError::InvalidChallenge(format!("unencodable payment payload: {}", e)))?;
    Ok(STANDARD.encode(json))
}

pub fn decode_header(header: &str) -> Result<PaymentPayload, SettlementError> {
    let raw = STANDARD
        .decode(header.trim())
        .map_err(|e| SettlementError::InvalidChallenge(format!("payment header is not base64: {}", e)))?;
    serde_json::from_slice(&raw)
        .map_err(|e| SettlementError::InvalidChallenge(format!("malformed payment header: {}", e)))
}
