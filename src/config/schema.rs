//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! settlement service. All types derive Serde traits for deserialization
//! from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the payroll settlement service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PayrollConfig {
    /// HTTP server settings.
    pub server: ServerConfig,

    /// Blockchain integration settings.
    pub blockchain: BlockchainConfig,

    /// Payroll ledger contract settings.
    pub ledger: LedgerConfig,

    /// Payment facilitator settings.
    pub facilitator: FacilitatorConfig,

    /// Networks a payment challenge may name.
    pub networks: Vec<NetworkConfig>,

    /// Contract event listener settings.
    pub listener: ListenerConfig,

    /// Local transaction tracking settings.
    pub transactions: TransactionConfig,

    /// Retry configuration for chain reads.
    pub retries: RetryConfig,

    /// Inbound webhook settings.
    pub webhooks: WebhookConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl PayrollConfig {
    /// Configured networks, falling back to the built-in defaults when the
    /// file does not list any.
    pub fn known_networks(&self) -> Vec<NetworkConfig> {
        if self.networks.is_empty() {
            NetworkConfig::defaults()
        } else {
            self.networks.clone()
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// API key for the admin routes (Bearer token).
    pub admin_api_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 60,
            // WARNING: This is a placeholder! Change this in production.
            admin_api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Blockchain integration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockchainConfig {
    /// Enable blockchain integration.
    pub enabled: bool,

    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// Chain ID (e.g., 338 for Cronos testnet, 31337 for local Anvil).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Number of block confirmations required for finality.
    pub confirmation_blocks: u32,

    /// Gas price multiplier (1.0 = estimated, 1.2 = 20% buffer).
    pub gas_price_multiplier: f64,

    /// Maximum gas price in gwei (protection against spikes).
    pub max_gas_price_gwei: u64,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rpc_url: "https://evm-t3.cronos.org".to_string(),
            failover_urls: Vec::new(),
            chain_id: 338,
            rpc_timeout_secs: 10,
            confirmation_blocks: 1,
            gas_price_multiplier: 1.2,
            max_gas_price_gwei: 50_000,
        }
    }
}

/// Payroll ledger contract configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Address of the payroll ledger contract.
    pub contract_address: String,

    /// Environment variable holding the admin private key.
    pub admin_key_env: String,

    /// Environment variable holding the facilitator private key.
    pub facilitator_key_env: String,

    /// Use the in-process ledger model instead of the deployed contract.
    pub simulated: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            contract_address: String::new(),
            admin_key_env: "PAYROLL_ADMIN_PRIVATE_KEY".to_string(),
            facilitator_key_env: "PAYROLL_FACILITATOR_PRIVATE_KEY".to_string(),
            simulated: false,
        }
    }
}

/// Payment facilitator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FacilitatorConfig {
    /// Base URL of the facilitator (verify/settle live under it).
    pub url: String,

    /// Facilitator request timeout in seconds.
    pub timeout_secs: u64,

    /// Network identifier put into issued challenges.
    pub network: String,

    /// Address of the settlement asset (6-decimal stablecoin).
    pub asset: String,

    /// EIP-712 domain name of the asset.
    pub asset_name: String,

    /// EIP-712 domain version of the asset.
    pub asset_version: String,

    /// Validity window of issued challenges in seconds.
    pub max_timeout_seconds: u64,

    /// How long a settled (payee, amount) pair counts as already paid.
    pub already_paid_window_secs: u64,

    /// Upper bound on waiting for a signature from the signer.
    pub signature_timeout_secs: u64,

    /// Where settled payment receipts are persisted.
    pub receipts_path: Option<String>,
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            url: "https://facilitator.cronoslabs.org/v2/x402".to_string(),
            timeout_secs: 30,
            network: "cronos-testnet".to_string(),
            asset: "0xc01efaaf7c5c61bebfaeb358e1161b537b8bc0e0".to_string(),
            asset_name: "Bridged USDC (Stargate)".to_string(),
            asset_version: "1".to_string(),
            max_timeout_seconds: 300,
            already_paid_window_secs: 24 * 3600,
            signature_timeout_secs: 120,
            receipts_path: None,
        }
    }
}

/// A network a payment offer may be settled on.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Network identifier as it appears in challenges.
    pub name: String,

    /// EVM chain id.
    pub chain_id: u64,

    /// Public RPC endpoint (used when a signer must register the chain).
    pub rpc_url: String,

    /// Block explorer base URL.
    #[serde(default)]
    pub explorer_url: String,

    /// Native currency symbol.
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
}

fn default_currency_symbol() -> String {
    "ETH".to_string()
}

impl NetworkConfig {
    /// Networks known without any configuration.
    pub fn defaults() -> Vec<NetworkConfig> {
        vec![
            NetworkConfig {
                name: "cronos-testnet".to_string(),
                chain_id: 338,
                rpc_url: "https://evm-t3.cronos.org".to_string(),
                explorer_url: "https://explorer.cronos.org/testnet".to_string(),
                currency_symbol: "TCRO".to_string(),
            },
            NetworkConfig {
                name: "cronos".to_string(),
                chain_id: 25,
                rpc_url: "https://evm.cronos.org".to_string(),
                explorer_url: "https://explorer.cronos.org".to_string(),
                currency_symbol: "CRO".to_string(),
            },
        ]
    }
}

/// Contract event listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Enable event polling.
    pub enabled: bool,

    /// Delay between the end of one poll and the start of the next.
    pub poll_interval_ms: u64,

    /// Consecutive failed polls tolerated before the listener stops.
    pub max_retries: u32,

    /// Delay before retrying a failed poll.
    pub retry_delay_ms: u64,

    /// Capacity of the broadcast event stream.
    pub channel_capacity: usize,

    /// Widest block span requested in one log query. Providers reject
    /// unbounded ranges, so a listener that fell behind catches up in steps.
    pub max_block_range: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 10_000,
            max_retries: 3,
            retry_delay_ms: 5_000,
            channel_capacity: 256,
            max_block_range: 2_000,
        }
    }
}

/// Transaction store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Where transaction records are persisted (None = memory only).
    pub storage_path: Option<String>,

    /// Maximum automatic retries per failed transaction.
    pub max_retries: u32,

    /// Fixed wait between marking a retry pending and resubmitting.
    pub retry_backoff_ms: u64,

    /// Interval of the background retry loop.
    pub retry_interval_secs: u64,

    /// Retention cap; oldest records are evicted first.
    pub max_records: usize,

    /// Upper bound on how long a tracked submission may stay pending.
    pub pending_timeout_secs: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            storage_path: Some("payroll_transactions.json".to_string()),
            max_retries: 3,
            retry_backoff_ms: 2_000,
            retry_interval_secs: 60,
            max_records: 100,
            pending_timeout_secs: 300,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

/// Inbound webhook configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Number of notifications kept in memory.
    pub log_capacity: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { log_capacity: 1000 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
