//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the public and admin routes
//! - Wire up middleware (request id, tracing, timeout, metrics)
//! - Serve until the shutdown coordinator fires

use alloy::primitives::Address;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::blockchain::BlockchainClient;
use crate::config::PayrollConfig;
use crate::http::request::{make_span, request_id_header, track_metrics};
use crate::http::webhooks::WebhookLog;
use crate::http::{payments, status, webhooks};
use crate::ledger::PayrollLedger;
use crate::lifecycle::Shutdown;
use crate::payments::PaymentOrchestrator;
use crate::transactions::{Resubmit, TransactionStore};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PayrollConfig>,
    pub ledger: Arc<dyn PayrollLedger>,
    pub orchestrator: PaymentOrchestrator,
    pub transactions: TransactionStore,
    pub resubmitter: Arc<dyn Resubmit>,
    pub webhooks: WebhookLog,
    /// Present when a live RPC backs the ledger.
    pub chain: Option<BlockchainClient>,
    /// Account recorded as `from` on admin transactions.
    pub operator: Address,
}

/// HTTP server for the settlement service.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(state: AppState) -> Router {
        let timeout = Duration::from_secs(state.config.server.request_timeout_secs);

        Router::new()
            .route("/health", get(status::health))
            .route("/api/payments/{request_id}", get(payments::get_payment))
            .route("/api/x402/settle", post(payments::settle_payment))
            .route(
                "/api/webhooks/x402",
                post(webhooks::receive_webhook).get(webhooks::list_webhooks),
            )
            .route("/api/transactions", get(status::list_transactions))
            .merge(setup_admin_router(state.clone()))
            .with_state(state)
            .layer(middleware::from_fn(track_metrics))
            .layer(PropagateRequestIdLayer::new(request_id_header()))
            .layer(TimeoutLayer::new(timeout))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(SetRequestIdLayer::new(request_id_header(), MakeRequestUuid))
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
