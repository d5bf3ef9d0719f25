//! Operator routes for ledger administration.
//!
//! Every write is recorded through `TransactionStore::track`, so the caller
//! always gets the resolved record back.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/payees", get(list_payees).post(add_payees))
        .route("/admin/payees/{address}/salary", post(update_salary))
        .route("/admin/payees/{address}/deactivate", post(deactivate_payee))
        .route("/admin/payroll", post(create_payroll))
        .route("/admin/payroll/should-trigger", get(should_trigger))
        .route("/admin/treasury/fund", post(fund_treasury))
        .route("/admin/threshold", post(set_threshold))
        .route("/admin/transactions/retry", post(retry_transactions))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
