//! Health and read-only status endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::server::AppState;
use crate::observability::metrics;
use crate::transactions::{Transaction, TransactionStatus, TransactionType};

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (rpc, healthy) = match &state.chain {
        Some(client) => {
            let healthy = client.is_healthy().await;
            metrics::record_rpc_health(healthy);
            (if healthy { "reachable" } else { "unreachable" }, healthy)
        }
        None => ("simulated", true),
    };

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = json!({
        "status": if healthy { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "rpc": rpc,
        "chainId": state.config.blockchain.chain_id,
        "ledger": state.ledger.address(),
        "pendingTransactions": state.transactions.pending().len(),
    });
    (status, Json(body))
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    #[serde(rename = "type")]
    pub tx_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
}

/// `GET /api/transactions`, newest first.
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionQuery>,
) -> Json<Vec<Transaction>> {
    let records = match query.tx_type {
        Some(tx_type) => state.transactions.by_type(tx_type),
        None => state.transactions.all(),
    };
    let records = records
        .into_iter()
        .filter(|tx| query.status.map_or(true, |status| tx.status == status))
        .collect();
    Json(records)
}
