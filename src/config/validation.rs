//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, caps > 0)
//! - Check URLs and addresses parse when the subsystem using them is enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PayrollConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use alloy::primitives::Address;

use crate::config::schema::PayrollConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &PayrollConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.trim().is_empty() {
        errors.push(ValidationError::new("server.bind_address", "must not be empty"));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be > 0"));
    }

    if config.blockchain.enabled {
        check_url(&mut errors, "blockchain.rpc_url", &config.blockchain.rpc_url);
        for url in &config.blockchain.failover_urls {
            check_url(&mut errors, "blockchain.failover_urls", url);
        }
        if config.blockchain.rpc_timeout_secs == 0 {
            errors.push(ValidationError::new("blockchain.rpc_timeout_secs", "must be > 0"));
        }
        if config.blockchain.gas_price_multiplier <= 0.0 {
            errors.push(ValidationError::new("blockchain.gas_price_multiplier", "must be positive"));
        }
        if !config.ledger.simulated {
            check_address(&mut errors, "ledger.contract_address", &config.ledger.contract_address);
        }
    }

    check_url(&mut errors, "facilitator.url", &config.facilitator.url);
    check_address(&mut errors, "facilitator.asset", &config.facilitator.asset);
    if config.facilitator.max_timeout_seconds == 0 {
        errors.push(ValidationError::new("facilitator.max_timeout_seconds", "must be > 0"));
    }
    if config.facilitator.signature_timeout_secs == 0 {
        errors.push(ValidationError::new("facilitator.signature_timeout_secs", "must be > 0"));
    }

    let mut seen = HashSet::new();
    for network in &config.networks {
        if !seen.insert(network.name.as_str()) {
            errors.push(ValidationError::new(
                "networks",
                format!("duplicate network name '{}'", network.name),
            ));
        }
        if network.chain_id == 0 {
            errors.push(ValidationError::new(
                "networks",
                format!("network '{}' has chain_id 0", network.name),
            ));
        }
    }

    if config.listener.poll_interval_ms == 0 {
        errors.push(ValidationError::new("listener.poll_interval_ms", "must be > 0"));
    }
    if config.listener.channel_capacity == 0 {
        errors.push(ValidationError::new("listener.channel_capacity", "must be > 0"));
    }
    if config.listener.max_block_range == 0 {
        errors.push(ValidationError::new("listener.max_block_range", "must be > 0"));
    }

    if config.transactions.max_records == 0 {
        errors.push(ValidationError::new("transactions.max_records", "must be > 0"));
    }
    if config.transactions.pending_timeout_secs == 0 {
        errors.push(ValidationError::new("transactions.pending_timeout_secs", "must be > 0"));
    }
    if config.transactions.retry_interval_secs == 0 {
        errors.push(ValidationError::new("transactions.retry_interval_secs", "must be > 0"));
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    if config.retries.max_delay_ms < config.retries.base_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must be >= retries.base_delay_ms",
        ));
    }

    if config.webhooks.log_capacity == 0 {
        errors.push(ValidationError::new("webhooks.log_capacity", "must be > 0"));
    }

    match config.observability.log_format.as_str() {
        "pretty" | "json" => {}
        other => errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format '{}' (expected pretty or json)", other),
        )),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if let Err(e) = value.parse::<url::Url>() {
        errors.push(ValidationError::new(field, format!("invalid URL '{}': {}", value, e)));
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<Address>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid address '{}'", value)));
    }
}
