//! x402 payroll settlement service.
//!
//! # Architecture Overview
//!
//! ```text
//!   payroll-cli / frontends
//!          │
//!          ▼
//!   ┌──────────────┐   402 challenge / settle   ┌──────────────────────┐
//!   │ http + admin │ ─────────────────────────▶ │ PaymentOrchestrator  │──▶ Facilitator (verify, settle)
//!   └──────┬───────┘                            └──────────┬───────────┘
//!          │ admin writes                                  │ markPaymentSettled
//!          ▼                                               ▼
//!   ┌──────────────────┐     LedgerCall          ┌──────────────────────┐
//!   │ TransactionStore │ ──────────────────────▶ │    PayrollLedger     │
//!   │  (+ retry loop)  │                         │ (contract | in-proc) │
//!   └──────────────────┘                         └──────────┬───────────┘
//!                                                           │ logs
//!                                                           ▼
//!                                                ┌──────────────────────┐
//!                                                │ ContractEventListener│──▶ receipts, logs
//!                                                └──────────────────────┘
//! ```
//!
//! Usage: `x402-payroll [config.toml]`. Without a path the defaults apply,
//! which run against the in-process ledger model.

use alloy::primitives::Address;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;

use x402_payroll::blockchain::{BlockchainClient, ChainReader};
use x402_payroll::config::{load_config, PayrollConfig};
use x402_payroll::events::{ContractEventListener, EventFilter};
use x402_payroll::facilitator::HttpFacilitator;
use x402_payroll::http::{AppState, HttpServer, WebhookLog};
use x402_payroll::ledger::{ContractLedger, InMemoryLedger, LedgerError, PayrollLedger};
use x402_payroll::lifecycle::{shutdown_on_signal, Shutdown};
use x402_payroll::observability::{logging, metrics};
use x402_payroll::payments::{NetworkRegistry, PaymentOrchestrator, PaymentReceipts};
use x402_payroll::transactions::{LedgerResubmitter, Resubmit, TransactionStore};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

struct LedgerBackend {
    ledger: Arc<dyn PayrollLedger>,
    reader: Arc<dyn ChainReader>,
    chain: Option<BlockchainClient>,
    operator: Address,
}

async fn connect_ledger(config: &PayrollConfig) -> Result<LedgerBackend, BoxError> {
    if !config.blockchain.enabled || config.ledger.simulated {
        tracing::warn!("Blockchain integration disabled, using the in-process ledger model");
        let ledger = InMemoryLedger::builder().build();
        let operator = ledger.facilitator();
        return Ok(LedgerBackend {
            ledger: Arc::new(ledger.clone()),
            reader: Arc::new(ledger),
            chain: None,
            operator,
        });
    }

    let client = BlockchainClient::new(config.blockchain.clone()).await?;
    client.verify_chain_id().await?;
    let contract = ContractLedger::from_config(client.clone(), &config.ledger, &config.facilitator)?
        .with_retries(config.retries.clone());
    if !contract.has_facilitator_key() {
        return Err(LedgerError::Configuration(format!(
            "{} is not set; settlements could not be acknowledged on the ledger",
            config.ledger.facilitator_key_env
        ))
        .into());
    }
    let operator = contract.admin_address().unwrap_or(Address::ZERO);

    Ok(LedgerBackend {
        ledger: Arc::new(contract),
        reader: Arc::new(client.clone()),
        chain: Some(client),
        operator,
    })
}

fn load_receipts(config: &PayrollConfig) -> Result<PaymentReceipts, BoxError> {
    let window = config.facilitator.already_paid_window_secs;
    let receipts = match &config.facilitator.receipts_path {
        Some(path) => PaymentReceipts::load_from_file(path, window)?,
        None => PaymentReceipts::new(window, None),
    };
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let pruned = receipts.prune(now);
    tracing::info!(loaded = receipts.len(), pruned, "Payment receipts ready");
    Ok(receipts)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(Path::new(&path))?,
        None => PayrollConfig::default(),
    };
    logging::init(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "x402-payroll starting");
    tracing::info!(
        bind_address = %config.server.bind_address,
        network = %config.facilitator.network,
        facilitator = %config.facilitator.url,
        listener_enabled = config.listener.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let backend = connect_ledger(&config).await?;
    let ledger = backend.ledger.clone();
    tracing::info!(ledger = %ledger.address(), operator = %backend.operator, "Ledger connected");

    let facilitator = Arc::new(HttpFacilitator::new(&config.facilitator)?);
    let orchestrator = PaymentOrchestrator::new(
        facilitator,
        ledger.clone(),
        load_receipts(&config)?,
        NetworkRegistry::new(config.known_networks()),
        config.facilitator.clone(),
    );

    let transactions = TransactionStore::load(config.transactions.clone())?;
    let resubmitter: Arc<dyn Resubmit> = Arc::new(LedgerResubmitter::new(ledger.clone()));
    let retry_loop = tokio::spawn(
        transactions
            .clone()
            .run_retry_loop(resubmitter.clone(), shutdown.subscribe()),
    );

    if config.listener.enabled {
        let listener = ContractEventListener::new(backend.reader.clone(), ledger.address(), config.listener.clone());
        listener.subscribe(EventFilter::Any, |event| {
            tracing::info!(
                event = event.name,
                block = event.block_number,
                tx_hash = ?event.transaction_hash,
                "Ledger event"
            );
        });
        listener.on_error(|e| tracing::error!(error = %e, "Event listener stopped"));

        tokio::spawn(
            orchestrator
                .clone()
                .follow_ledger_settlements(listener.stream(), shutdown.subscribe()),
        );

        match listener.start().await {
            Ok(()) => {
                let stop = shutdown.wait();
                let listener = listener.clone();
                tokio::spawn(async move {
                    stop.await;
                    listener.stop();
                });
            }
            Err(e) => tracing::error!(error = %e, "Event listener failed to start"),
        }
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        ledger,
        orchestrator,
        transactions,
        resubmitter,
        webhooks: WebhookLog::new(config.webhooks.log_capacity),
        chain: backend.chain,
        operator: backend.operator,
    };

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    HttpServer::new(state).run(listener, shutdown.clone()).await?;

    // The server can also stop on its own; make sure background tasks follow.
    shutdown.trigger();
    if let Err(e) = retry_loop.await {
        tracing::error!(error = %e, "Transaction retry loop panicked");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
