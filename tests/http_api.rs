//! HTTP surface exercised through the router without a socket.

mod common;

use alloy::primitives::U256;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use common::*;
use x402_payroll::config::FacilitatorConfig;
use x402_payroll::facilitator::PaymentRequirements;
use x402_payroll::http::X_REQUEST_ID;
use x402_payroll::ledger::{Clock, InMemoryLedger, ManualClock, PayrollLedger, PAY_PERIOD_SECS};
use x402_payroll::payments::authorization::{asset_domain, authorization_for, encode_header, sign_authorization};
use x402_payroll::HttpServer;

struct Harness {
    router: Router,
    ledger: InMemoryLedger,
    clock: Arc<ManualClock>,
    facilitator: Arc<MockFacilitator>,
}

/// Router over a ledger holding one unsettled request (#1) for `PAYEE`.
async fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(START));
    let ledger = ledger(&clock, 10_000_000);
    ledger.add_payee(PAYEE, U256::from(1_000_000u64)).await.unwrap();
    clock.advance(PAY_PERIOD_SECS);
    ledger.create_payment_requests().await.unwrap();

    let facilitator = Arc::new(MockFacilitator::default());
    let orchestrator = orchestrator(facilitator.clone(), Arc::new(ledger.clone()), clock.clone());
    let router = HttpServer::build_router(app_state(ledger.clone(), orchestrator));
    Harness {
        router,
        ledger,
        clock,
        facilitator,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin(mut request: Request<Body>) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", ADMIN_KEY).parse().unwrap(),
    );
    request
}

/// Payment header for `offer`, signed the way a payer's wallet would.
async fn signed_header(offer: &PaymentRequirements, issued_at: u64) -> String {
    let wallet = wallet();
    let config = FacilitatorConfig::default();
    let auth = authorization_for(wallet.address(), offer, issued_at);
    let domain = asset_domain(&config.asset_name, &config.asset_version, 338, offer.asset);
    let payload = sign_authorization(&wallet, &auth, &domain, &offer.network, offer.asset)
        .await
        .unwrap();
    encode_header(&payload).unwrap()
}

async fn offer_for(router: &Router, request_id: u64) -> PaymentRequirements {
    let (status, body) = send(router, get(&format!("/api/payments/{}", request_id))).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    serde_json::from_value(body["accepts"][0].clone()).unwrap()
}

#[tokio::test]
async fn test_health_reports_simulated_backend() {
    let h = harness().await;
    let response = h.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(X_REQUEST_ID));

    let (_, body) = send(&h.router, get("/health")).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["rpc"], "simulated");
    assert_eq!(body["pendingTransactions"], 0);
}

#[tokio::test]
async fn test_unpaid_request_returns_challenge() {
    let h = harness().await;

    let (status, body) = send(&h.router, get("/api/payments/1")).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["x402Version"], 1);
    let offer = &body["accepts"][0];
    assert_eq!(offer["scheme"], "exact");
    assert_eq!(offer["maxAmountRequired"], "1000000");
    assert_eq!(offer["maxTimeoutSeconds"], 300);
    assert_eq!(offer["extra"]["paymentId"], "request-1");
    assert_eq!(offer["extra"]["requestId"], "1");

    let (status, body) = send(&h.router, get("/api/payments/99")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_settle_then_already_paid() {
    let h = harness().await;
    let offer = offer_for(&h.router, 1).await;
    let header = signed_header(&offer, h.clock.now()).await;

    let (status, body) = send(
        &h.router,
        post(
            "/api/x402/settle",
            json!({
                "paymentHeader": header,
                "paymentRequirements": offer,
                "userAddress": wallet().address(),
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["alreadyPaid"], false);
    assert_eq!(body["x402Settlement"]["txHash"], SETTLE_TX);
    assert_eq!(body["x402Settlement"]["paymentId"], "request-1");
    assert_eq!(body["contractUpdate"]["requestId"], 1);
    assert_eq!(body["contractUpdate"]["acknowledged"], true);
    assert_eq!(body["paymentDetails"]["amount"], "1000000");

    assert!(h.ledger.get_payment_request(1).await.unwrap().unwrap().settled);

    let (status, body) = send(&h.router, get("/api/payments/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alreadyPaid"], true);
    assert_eq!(body["txHash"], SETTLE_TX);
    assert_eq!(h.facilitator.settles(), 1);
}

#[tokio::test]
async fn test_settle_rejects_foreign_authorization() {
    let h = harness().await;
    let offer = offer_for(&h.router, 1).await;
    let header = signed_header(&offer, h.clock.now()).await;

    // Claimed payer differs from the signer.
    let (status, body) = send(
        &h.router,
        post(
            "/api/x402/settle",
            json!({
                "paymentHeader": header,
                "paymentRequirements": offer,
                "userAddress": "0x2222222222222222222222222222222222222222",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["success"], false);
    assert_eq!(body["details"]["paymentId"], "request-1");
    assert!(body["details"].get("txHash").is_none());
    assert_eq!(h.facilitator.settles(), 0);
    assert!(!h.ledger.get_payment_request(1).await.unwrap().unwrap().settled);

    let (status, _) = send(&h.router, post("/api/x402/settle", json!({ "paymentHeader": 7 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_expired_authorization_is_refused() {
    let h = harness().await;
    let offer = offer_for(&h.router, 1).await;
    let header = signed_header(&offer, h.clock.now()).await;
    h.clock.advance(offer.max_timeout_seconds);

    let (status, body) = send(
        &h.router,
        post(
            "/api/x402/settle",
            json!({ "paymentHeader": header, "paymentRequirements": offer }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["details"]["errorKind"], "settlement_failed");
    assert_eq!(h.facilitator.settles(), 0);
}

#[tokio::test]
async fn test_webhooks_are_logged() {
    let h = harness().await;

    let (status, body) = send(
        &h.router,
        post(
            "/api/webhooks/x402",
            json!({ "event": "payment.settled", "txHash": SETTLE_TX }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["handled"], true);

    let (_, body) = send(&h.router, post("/api/webhooks/x402", json!({ "event": "payment.refunded" }))).await;
    assert_eq!(body["handled"], false);

    let (status, _) = send(&h.router, post("/api/webhooks/x402", json!({ "txHash": SETTLE_TX }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&h.router, get("/api/webhooks/x402")).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["notifications"][0]["event"], "payment.settled");
    assert_eq!(body["notifications"][0]["payload"]["txHash"], SETTLE_TX);
}

#[tokio::test]
async fn test_admin_requires_key() {
    let h = harness().await;

    let (status, _) = send(&h.router, get("/admin/status")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut wrong = get("/admin/status");
    wrong
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer nope".parse().unwrap());
    let (status, _) = send(&h.router, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&h.router, admin(get("/admin/status"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "operational");
    assert_eq!(body["network"], "cronos-testnet");
}

#[tokio::test]
async fn test_admin_writes_are_tracked() {
    let h = harness().await;
    let newcomer = "0x3333333333333333333333333333333333333333";

    let (status, body) = send(
        &h.router,
        admin(post("/admin/payees", json!({ "payee": newcomer, "salary": "2500000" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["transaction"]["status"], "confirmed");
    assert_eq!(body["transaction"]["type"], "add_payee");

    let (_, body) = send(&h.router, admin(get("/admin/payees"))).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    // Duplicate registration reverts and is recorded as failed.
    let (status, body) = send(
        &h.router,
        admin(post("/admin/payees", json!({ "payee": newcomer, "salary": "2500000" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["details"]["status"], "failed");

    let (status, _) = send(&h.router, admin(post("/admin/payees", json!({ "payee": newcomer, "salary": "0" })))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&h.router, get("/api/transactions")).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, body) = send(&h.router, get("/api/transactions?status=failed")).await;
    let failed = body.as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["type"], "add_payee");

    let (_, body) = send(&h.router, get("/api/transactions?type=fund_treasury")).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_should_trigger_reports_inputs() {
    let h = harness().await;
    let (status, body) = send(&h.router, admin(get("/admin/payroll/should-trigger?revenue=0"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revenue"], "0");
    assert_eq!(body["treasuryBalance"], "10000000");

    let (status, _) = send(&h.router, admin(get("/admin/payroll/should-trigger?revenue=lots"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_retry_reports_pass() {
    let h = harness().await;

    // PAYEE is already registered, so this reverts every time.
    let (status, _) = send(
        &h.router,
        admin(post("/admin/payees", json!({ "payee": PAYEE, "salary": "1000000" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, _) = send(&h.router, post("/admin/transactions/retry", json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&h.router, admin(post("/admin/transactions/retry", json!({})))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["attempted"], 1);
    assert_eq!(body["confirmed"], 0);
    assert_eq!(body["failed"], 1);

    let (_, body) = send(&h.router, get("/api/transactions?status=failed")).await;
    assert_eq!(body[0]["type"], "add_payee");
    assert_eq!(body[0]["retryCount"], 1);
}
