//! Inbound facilitator webhooks.
//!
//! Notifications are appended to a bounded in-memory log (oldest evicted)
//! and dispatched to the handler registered for their `event`.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::observability::metrics;

pub use crate::facilitator::EVENT_SETTLED;
pub const EVENT_FAILED: &str = "payment.failed";
pub const EVENT_PENDING: &str = "payment.pending";
pub const EVENT_EXPIRED: &str = "payment.expired";

/// A received notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookNotification {
    pub event: String,
    pub received_at: DateTime<Utc>,
    pub payload: Value,
}

pub type WebhookHandler = Arc<dyn Fn(&WebhookNotification) + Send + Sync>;

/// Bounded notification log plus per-event handlers.
#[derive(Clone)]
pub struct WebhookLog {
    entries: Arc<Mutex<VecDeque<WebhookNotification>>>,
    capacity: usize,
    handlers: Arc<DashMap<String, WebhookHandler>>,
}

impl WebhookLog {
    /// Empty log with logging handlers for the four payment events.
    pub fn new(capacity: usize) -> Self {
        let log = Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
            handlers: Arc::new(DashMap::new()),
        };

        log.on(EVENT_SETTLED, |n| {
            tracing::info!(tx_hash = ?n.payload.get("txHash"), "Facilitator reported settlement")
        });
        log.on(EVENT_FAILED, |n| {
            tracing::warn!(error = ?n.payload.get("error"), "Facilitator reported failed payment")
        });
        log.on(EVENT_PENDING, |n| {
            tracing::debug!(payload = %n.payload, "Facilitator reported pending payment")
        });
        log.on(EVENT_EXPIRED, |n| {
            tracing::warn!(payload = %n.payload, "Facilitator reported expired authorization")
        });
        log
    }

    /// Register (or replace) the handler for `event`.
    pub fn on(&self, event: &str, handler: impl Fn(&WebhookNotification) + Send + Sync + 'static) {
        self.handlers.insert(event.to_string(), Arc::new(handler));
    }

    /// Append `payload` to the log and dispatch it. Returns whether a handler
    /// ran for the event.
    pub fn receive(&self, event: &str, payload: Value) -> (WebhookNotification, bool) {
        let notification = WebhookNotification {
            event: event.to_string(),
            received_at: Utc::now(),
            payload,
        };

        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            while entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(notification.clone());
        }
        metrics::record_webhook(event.to_string());

        let handler = self.handlers.get(event).map(|h| h.value().clone());
        let handled = match handler {
            Some(handler) => {
                if catch_unwind(AssertUnwindSafe(|| handler(&notification))).is_err() {
                    tracing::error!(event, "Webhook handler panicked");
                }
                true
            }
            None => {
                tracing::warn!(event, "No handler for webhook event");
                false
            }
        };
        (notification, handled)
    }

    /// Logged notifications, oldest first.
    pub fn entries(&self) -> Vec<WebhookNotification> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for WebhookLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookLog")
            .field("entries", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// `POST /api/webhooks/x402`
pub async fn receive_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let event = payload
        .get("event")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("webhook body has no event"))?;

    let (notification, handled) = state.webhooks.receive(&event, payload);
    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "event": notification.event,
            "handled": handled,
            "receivedAt": notification.received_at,
        })),
    ))
}

/// `GET /api/webhooks/x402`
pub async fn list_webhooks(State(state): State<AppState>) -> Json<Value> {
    let entries = state.webhooks.entries();
    Json(json!({
        "count": entries.len(),
        "notifications": entries,
    }))
}
