//! HTTP client for the x402 payment facilitator.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use crate::config::FacilitatorConfig;
use crate::facilitator::types::{
    FacilitatorRequest, PaymentRequirements, SettleResponse, VerifyResponse, X402_VERSION,
};

/// Header carrying the protocol version on facilitator requests.
pub const X402_VERSION_HEADER: &str = "X402-Version";

#[derive(Debug, Error)]
pub enum FacilitatorError {
    #[error("Facilitator request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Facilitator timed out after {0} seconds")]
    Timeout(u64),

    #[error("Facilitator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid facilitator response: {0}")]
    Decode(String),
}

/// The third-party settlement service: verify an authorization, then settle it.
#[async_trait]
pub trait Facilitator: Send + Sync {
    async fn verify(
        &self,
        payment_header: &str,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorError>;

    async fn settle(
        &self,
        payment_header: &str,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorError>;
}

/// Facilitator reached over HTTP/JSON.
#[derive(Clone, Debug)]
pub struct HttpFacilitator {
    client: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
}

impl HttpFacilitator {
    pub fn new(config: &FacilitatorConfig) -> Result<Self, FacilitatorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout_secs: config.timeout_secs,
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        payment_header: &str,
        requirements: &PaymentRequirements,
    ) -> Result<T, FacilitatorError> {
        let url = format!("{}/{}", self.base_url, path);
        let body = FacilitatorRequest {
            x402_version: X402_VERSION,
            payment_header,
            payment_requirements: requirements,
        };

        let response = self
            .client
            .post(&url)
            .header(X402_VERSION_HEADER, X402_VERSION.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_transport(e))?;
        tracing::debug!(url = %url, status = status.as_u16(), "Facilitator responded");

        // Facilitators answer rejections with a 4xx carrying the normal body.
        if status.is_success() || status.is_client_error() {
            if let Ok(parsed) = serde_json::from_str::<T>(&text) {
                return Ok(parsed);
            }
        }

        if !status.is_success() {
            return Err(FacilitatorError::Status {
                status: status.as_u16(),
                body: truncate(&text, 512),
            });
        }
        Err(FacilitatorError::Decode(truncate(&text, 512)))
    }

    fn map_transport(&self, err: reqwest::Error) -> FacilitatorError {
        if err.is_timeout() {
            FacilitatorError::Timeout(self.timeout_secs)
        } else {
            FacilitatorError::Http(err)
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    async fn verify(
        &self,
        payment_header: &str,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorError> {
        self.post("verify", payment_header, requirements).await
    }

    async fn settle(
        &self,
        payment_header: &str,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorError> {
        let response: SettleResponse = self.post("settle", payment_header, requirements).await?;
        if response.event.is_empty() && response.error.is_none() {
            tracing::warn!("Facilitator settle response carried no event");
        }
        Ok(response)
    }
}

/// Whether `status` is worth retrying against the facilitator later.
pub fn is_transient_status(status: u16) -> bool {
    StatusCode::from_u16(status)
        .map(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[test]
    fn test_transient_status() {
        assert!(is_transient_status(503));
        assert!(is_transient_status(429));
        assert!(!is_transient_status(400));
    }

    #[tokio::test]
    async fn test_unreachable_facilitator_is_http_error() {
        let config = FacilitatorConfig {
            url: "http://127.0.0.1:1/".to_string(),
            timeout_secs: 2,
            ..FacilitatorConfig::default()
        };
        let facilitator = HttpFacilitator::new(&config).unwrap();
        assert_eq!(facilitator.base_url, "http://127.0.0.1:1");

        let offer: PaymentRequirements = serde_json::from_value(serde_json::json!({
            "scheme": "exact",
            "network": "cronos-testnet",
            "asset": "0xc01efaaf7c5c61bebfaeb358e1161b537b8bc0e0",
            "payTo": "0x1111111111111111111111111111111111111111",
            "maxAmountRequired": "1",
            "maxTimeoutSeconds": 60
        }))
        .unwrap();
        let err = facilitator.verify("header", &offer).await.unwrap_err();
        assert!(crate::resilience::is_network_error(&err), "{}", err);
    }
}
