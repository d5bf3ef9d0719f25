//! Payment endpoints: the 402-protected request resource and settlement.

use alloy::primitives::Address;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::FacilitatorConfig;
use crate::error::ErrorKind;
use crate::facilitator::{OfferExtra, PaymentChallenge, PaymentRequirements, SCHEME_EXACT};
use crate::http::request::request_id;
use crate::http::response::{status_for, ApiError};
use crate::http::server::AppState;
use crate::ledger::PaymentRequest;
use crate::payments::request_payment_id;

/// Body of `POST /api/x402/settle`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub payment_header: String,
    pub payment_requirements: PaymentRequirements,
    #[serde(default)]
    pub user_address: Option<Address>,
}

/// The single `exact` offer for ledger request `request`.
pub fn challenge_for(
    request: &PaymentRequest,
    config: &FacilitatorConfig,
    ledger: Address,
) -> Result<PaymentChallenge, ApiError> {
    let asset: Address = config
        .asset
        .parse()
        .map_err(|e| ApiError::unavailable(format!("invalid asset address '{}': {}", config.asset, e)))?;

    Ok(PaymentChallenge::new(PaymentRequirements {
        scheme: SCHEME_EXACT.to_string(),
        network: config.network.clone(),
        asset,
        pay_to: request.payee,
        max_amount_required: request.amount,
        resource: format!("/api/payments/{}", request.request_id),
        description: format!("Payroll payment request #{}", request.request_id),
        mime_type: "application/json".to_string(),
        max_timeout_seconds: config.max_timeout_seconds,
        output_schema: None,
        extra: OfferExtra {
            payment_id: Some(request_payment_id(request.request_id)),
            request_id: Some(request.request_id.to_string()),
            contract_address: Some(ledger),
            name: Some(config.asset_name.clone()),
            version: Some(config.asset_version.clone()),
            other: Default::default(),
        },
    }))
}

/// `GET /api/payments/{requestId}`
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    let request = state
        .ledger
        .get_payment_request(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Payment request {} not found", id)))?;

    if let Some(paid) = state
        .orchestrator
        .check_already_paid(request.payee, request.amount, Some(id))
        .await?
    {
        let body = json!({
            "alreadyPaid": true,
            "paymentId": paid.payment_id,
            "txHash": paid.tx_hash,
        });
        return Ok((StatusCode::OK, Json(body)).into_response());
    }

    if request.settled {
        // Settled by another instance; only the ledger's record is known here.
        let body = json!({
            "alreadyPaid": true,
            "paymentId": request_payment_id(id),
            "txHash": Value::Null,
            "settlementId": request.settlement_id,
        });
        return Ok((StatusCode::OK, Json(body)).into_response());
    }

    let challenge = challenge_for(&request, state.orchestrator.config(), state.ledger.address())?;
    tracing::debug!(request_id = id, payee = %request.payee, "Issuing payment challenge");
    Ok((StatusCode::PAYMENT_REQUIRED, Json(challenge)).into_response())
}

/// `POST /api/x402/settle`
pub async fn settle_payment(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let req: SettleRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("invalid settlement request: {}", e)))?;
    let requirements = &req.payment_requirements;

    tracing::info!(
        request_id = %request_id(&headers),
        payment_id = ?requirements.extra.payment_id,
        pay_to = %requirements.pay_to,
        "Settlement requested"
    );

    let result = state
        .orchestrator
        .settle_authorization(&req.payment_header, requirements, req.user_address)
        .await?;

    if let Some(error) = &result.error {
        let kind = result.error_kind.unwrap_or(ErrorKind::SettlementFailed);
        return Err(ApiError::new(status_for(kind), error.clone()).with_details(json!(&result)));
    }

    let receipt = state.orchestrator.receipts().lookup(
        requirements.pay_to,
        requirements.max_amount_required,
        state.orchestrator.now(),
    );
    let settled_at = receipt
        .as_ref()
        .and_then(|r| DateTime::<Utc>::from_timestamp(r.settled_at as i64, 0))
        .unwrap_or_else(Utc::now);
    let acknowledged = receipt.as_ref().is_some_and(|r| r.ledger_acknowledged);

    Ok(Json(json!({
        "success": true,
        "alreadyPaid": result.already_paid,
        "x402Settlement": {
            "txHash": result.tx_hash,
            "paymentId": result.payment_id,
            "settledAt": settled_at,
        },
        "contractUpdate": {
            "contractAddress": state.ledger.address(),
            "requestId": requirements.extra.ledger_request_id(),
            "settlementId": result.settlement_id,
            "ledgerTxHash": result.ledger_tx_hash,
            "acknowledged": acknowledged,
        },
        "paymentDetails": {
            "from": req.user_address,
            "payTo": requirements.pay_to,
            "amount": requirements.max_amount_required.to_string(),
            "asset": requirements.asset,
            "network": requirements.network,
            "stage": result.stage,
        },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, B256, U256};

    #[test]
    fn test_challenge_for_request() {
        let request = PaymentRequest {
            request_id: 7,
            payee: address!("1111111111111111111111111111111111111111"),
            amount: U256::from(3_000_000_000u64),
            created_at: 0,
            settlement_id: B256::ZERO,
            settled: false,
        };
        let ledger = Address::repeat_byte(0x42);
        let config = FacilitatorConfig::default();

        let challenge = challenge_for(&request, &config, ledger).unwrap();
        let offer = challenge.offer().unwrap();
        assert_eq!(offer.scheme, SCHEME_EXACT);
        assert_eq!(offer.pay_to, request.payee);
        assert_eq!(offer.max_timeout_seconds, 300);
        assert_eq!(offer.extra.ledger_request_id(), Some(7));
        assert_eq!(offer.extra.payment_id.as_deref(), Some("request-7"));
        assert_eq!(offer.extra.contract_address, Some(ledger));

        let json = serde_json::to_value(&challenge).unwrap();
        assert_eq!(json["accepts"][0]["maxAmountRequired"], "3000000000");
    }
}
