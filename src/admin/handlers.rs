use alloy::primitives::{Address, U256};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::ledger::types::u256_decimal;
use crate::ledger::{LedgerCall, Payee};
use crate::transactions::{RetrySummary, Transaction, TransactionStatus};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub ledger: Address,
    pub operator: Address,
    pub network: String,
    pub receipts: usize,
    pub transactions: usize,
    pub webhooks: usize,
}

/// Single or batch payee registration.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AddPayeesRequest {
    Batch {
        payees: Vec<Address>,
        #[serde(with = "u256_decimal::vec")]
        salaries: Vec<U256>,
    },
    Single {
        payee: Address,
        #[serde(with = "u256_decimal")]
        salary: U256,
    },
}

#[derive(Debug, Deserialize)]
pub struct SalaryRequest {
    #[serde(with = "u256_decimal")]
    pub salary: U256,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    #[serde(with = "u256_decimal")]
    pub amount: U256,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdRequest {
    #[serde(with = "u256_decimal")]
    pub threshold: U256,
}

#[derive(Debug, Deserialize)]
pub struct RevenueQuery {
    pub revenue: String,
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    let address: Address = raw
        .parse()
        .map_err(|e| ApiError::bad_request(format!("invalid address '{}': {}", raw, e)))?;
    if address == Address::ZERO {
        return Err(ApiError::bad_request("zero address is not a valid payee"));
    }
    Ok(address)
}

fn require_positive(value: U256, what: &str) -> Result<(), ApiError> {
    if value.is_zero() {
        return Err(ApiError::bad_request(format!("{} must be greater than zero", what)));
    }
    Ok(())
}

/// Run `call` through the transaction store and report the resolved record.
/// The write runs on its own task so a request timeout cannot cut it short.
async fn submit(state: &AppState, call: LedgerCall) -> Result<Json<Value>, ApiError> {
    let value = call.value();
    let store = state.transactions.clone();
    let ledger = state.ledger.clone();
    let operator = state.operator;

    let tx: Transaction = tokio::spawn(async move {
        store
            .track(call, operator, ledger.address(), value, ledger.as_ref())
            .await
    })
    .await
    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("transaction task failed: {}", e)))?;

    match tx.status {
        TransactionStatus::Confirmed => Ok(Json(json!({ "success": true, "transaction": tx }))),
        _ => {
            let error = tx
                .error
                .clone()
                .unwrap_or_else(|| "Transaction did not confirm".to_string());
            Err(ApiError::new(StatusCode::BAD_GATEWAY, error).with_details(json!(tx)))
        }
    }
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        ledger: state.ledger.address(),
        operator: state.operator,
        network: state.config.facilitator.network.clone(),
        receipts: state.orchestrator.receipts().len(),
        transactions: state.transactions.len(),
        webhooks: state.webhooks.len(),
    })
}

pub async fn list_payees(State(state): State<AppState>) -> Result<Json<Vec<Payee>>, ApiError> {
    let mut payees = Vec::new();
    for address in state.ledger.get_active_payees().await? {
        if let Some(payee) = state.ledger.get_payee(address).await? {
            payees.push(payee);
        }
    }
    Ok(Json(payees))
}

pub async fn add_payees(
    State(state): State<AppState>,
    Json(body): Json<AddPayeesRequest>,
) -> Result<Json<Value>, ApiError> {
    let call = match body {
        AddPayeesRequest::Single { payee, salary } => {
            require_positive(salary, "salary")?;
            LedgerCall::AddPayee { payee, salary }
        }
        AddPayeesRequest::Batch { payees, salaries } => {
            if payees.len() != salaries.len() {
                return Err(ApiError::bad_request("payees and salaries differ in length"));
            }
            for salary in &salaries {
                require_positive(*salary, "salary")?;
            }
            LedgerCall::AddPayees { payees, salaries }
        }
    };
    submit(&state, call).await
}

pub async fn update_salary(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(body): Json<SalaryRequest>,
) -> Result<Json<Value>, ApiError> {
    let payee = parse_address(&address)?;
    require_positive(body.salary, "salary")?;
    submit(&state, LedgerCall::UpdateSalary { payee, salary: body.salary }).await
}

pub async fn deactivate_payee(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let payee = parse_address(&address)?;
    submit(&state, LedgerCall::DeactivatePayee { payee }).await
}

pub async fn create_payroll(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    submit(&state, LedgerCall::CreatePayments).await
}

pub async fn should_trigger(
    State(state): State<AppState>,
    Query(query): Query<RevenueQuery>,
) -> Result<Json<Value>, ApiError> {
    let revenue = u256_decimal::parse(&query.revenue).map_err(ApiError::bad_request)?;
    let should_trigger = state.ledger.should_trigger_payroll(revenue).await?;
    let threshold = state.ledger.revenue_threshold().await?;
    let balance = state.ledger.get_treasury_balance().await?;

    Ok(Json(json!({
        "shouldTrigger": should_trigger,
        "revenue": revenue.to_string(),
        "threshold": threshold.to_string(),
        "treasuryBalance": balance.to_string(),
    })))
}

pub async fn fund_treasury(
    State(state): State<AppState>,
    Json(body): Json<AmountRequest>,
) -> Result<Json<Value>, ApiError> {
    require_positive(body.amount, "amount")?;
    submit(&state, LedgerCall::FundTreasury { amount: body.amount }).await
}

pub async fn set_threshold(
    State(state): State<AppState>,
    Json(body): Json<ThresholdRequest>,
) -> Result<Json<Value>, ApiError> {
    submit(&state, LedgerCall::UpdateThreshold { threshold: body.threshold }).await
}

pub async fn retry_transactions(State(state): State<AppState>) -> Result<Json<RetrySummary>, ApiError> {
    let store = state.transactions.clone();
    let resubmitter = state.resubmitter.clone();
    let summary = tokio::spawn(async move { store.retry_failed_transactions(resubmitter.as_ref()).await })
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("retry task failed: {}", e)))?;
    Ok(Json(summary))
}
