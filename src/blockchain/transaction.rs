//! Transaction building, signing, and confirmation monitoring.
//!
//! # Responsibilities
//! - Build transactions with gas estimation and a gas price ceiling
//! - Sign and broadcast transactions
//! - Monitor confirmations

use alloy::eips::eip2718::Encodable2718;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use std::time::Duration;
use tokio::time::{interval, timeout};

use crate::blockchain::client::BlockchainClient;
use crate::blockchain::types::{BlockchainError, BlockchainResult, ConfirmationStatus};
use crate::blockchain::wallet::Wallet;

/// Gas headroom applied on top of the node's estimate, in percent.
const GAS_LIMIT_HEADROOM_PCT: u64 = 20;

/// Transaction builder for contract writes.
#[derive(Clone, Debug)]
pub struct TxBuilder {
    client: BlockchainClient,
    wallet: Wallet,
}

impl TxBuilder {
    /// Create a new transaction builder.
    pub fn new(client: BlockchainClient, wallet: Wallet) -> Self {
        Self { client, wallet }
    }

    /// Build a transaction request with gas estimation.
    pub async fn build(
        &self,
        to: Address,
        value: U256,
        data: Bytes,
    ) -> BlockchainResult<TransactionRequest> {
        let chain_nonce = self.client.get_transaction_count(self.wallet.address()).await?;
        self.wallet.set_nonce(chain_nonce);

        let gas_price = self.client.get_gas_price().await?;
        let gas_price_gwei = gas_price / 1_000_000_000;

        let config = self.client.config();
        if gas_price_gwei > config.max_gas_price_gwei as u128 {
            return Err(BlockchainError::GasPriceTooHigh {
                current_gwei: gas_price_gwei as u64,
                max_gwei: config.max_gas_price_gwei,
            });
        }

        let adjusted_gas_price = (gas_price as f64 * config.gas_price_multiplier) as u128;

        let unsized_tx = TransactionRequest::default()
            .with_from(self.wallet.address())
            .with_to(to)
            .with_value(value)
            .with_input(data);
        let estimate = self.client.estimate_gas(&unsized_tx).await?;
        let gas_limit = estimate + estimate * GAS_LIMIT_HEADROOM_PCT / 100;

        let nonce = self.wallet.get_and_increment_nonce();

        Ok(unsized_tx
            .with_nonce(nonce)
            .with_gas_price(adjusted_gas_price)
            .with_chain_id(self.wallet.chain_id())
            .with_gas_limit(gas_limit))
    }

    /// Sign and broadcast a transaction, returning its hash.
    pub async fn submit(&self, to: Address, value: U256, data: Bytes) -> BlockchainResult<TxHash> {
        let tx = self.build(to, value, data).await?;
        let envelope = tx
            .build(&self.wallet.network_wallet())
            .await
            .map_err(|e| BlockchainError::Wallet(format!("Failed to sign transaction: {}", e)))?;

        let tx_hash = self.client.send_raw_transaction(&envelope.encoded_2718()).await?;
        tracing::info!(tx_hash = %tx_hash, to = %to, "Transaction broadcast");
        Ok(tx_hash)
    }

    /// Wait for a transaction to be confirmed.
    pub async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        timeout_secs: u64,
    ) -> BlockchainResult<ConfirmationStatus> {
        let required_confirmations = self.client.confirmation_blocks();
        let timeout_duration = Duration::from_secs(timeout_secs);
        let poll_interval = Duration::from_secs(2);

        let result = timeout(timeout_duration, async {
            let mut ticker = interval(poll_interval);

            loop {
                ticker.tick().await;

                let receipt = match self.client.get_transaction_receipt(tx_hash).await? {
                    Some(r) => r,
                    None => {
                        tracing::debug!(tx_hash = %tx_hash, "Transaction pending");
                        continue;
                    }
                };

                if !receipt.status() {
                    return Ok(ConfirmationStatus::Failed("Transaction reverted".to_string()));
                }

                let current_block = self.client.get_block_number().await?;
                let tx_block = receipt.block_number.unwrap_or(current_block);
                let confirmations = current_block.saturating_sub(tx_block) as u32 + 1;

                if confirmations >= required_confirmations {
                    return Ok(ConfirmationStatus::Confirmed {
                        block_number: tx_block,
                    });
                }

                tracing::debug!(
                    tx_hash = %tx_hash,
                    confirmations = confirmations,
                    required = required_confirmations,
                    "Waiting for confirmations"
                );
            }
        })
        .await;

        match result {
            Ok(status) => status,
            Err(_) => Err(BlockchainError::ConfirmationTimeout(required_confirmations)),
        }
    }

    /// Submit and wait for confirmation. A revert or drop becomes an error.
    pub async fn submit_and_confirm(
        &self,
        to: Address,
        data: Bytes,
        timeout_secs: u64,
    ) -> BlockchainResult<(TxHash, u64)> {
        let tx_hash = self.submit(to, U256::ZERO, data).await?;
        match self.wait_for_confirmation(tx_hash, timeout_secs).await? {
            ConfirmationStatus::Confirmed { block_number } => Ok((tx_hash, block_number)),
            ConfirmationStatus::Failed(reason) => Err(BlockchainError::Reverted {
                message: reason,
                data: None,
            }),
            status => Err(BlockchainError::Rpc(format!(
                "Unexpected confirmation status for {}: {:?}",
                tx_hash, status
            ))),
        }
    }

    /// Get the wallet address.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }
}
