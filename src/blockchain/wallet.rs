//! Wallet management and transaction signing.
//!
//! # Security
//! - Private keys are loaded ONLY from environment variables
//! - Keys are never logged or serialized

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signature, Signer};
use dashmap::DashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::blockchain::types::{BlockchainError, BlockchainResult};

/// Wallet for transaction signing with nonce management.
///
/// The active chain can be switched at runtime, but only to chains that have
/// been registered with the wallet first.
#[derive(Debug, Clone)]
pub struct Wallet {
    /// The underlying signer (private key).
    signer: PrivateKeySigner,
    /// Current nonce for sequential transactions.
    nonce: Arc<AtomicU64>,
    /// Active chain ID for EIP-155 replay protection.
    chain_id: Arc<AtomicU64>,
    /// Chains this wallet may switch to.
    registered_chains: Arc<DashSet<u64>>,
}

impl Wallet {
    /// Create a wallet from a hex-encoded private key string (with or
    /// without 0x prefix).
    pub fn from_private_key(private_key_hex: &str, chain_id: u64) -> BlockchainResult<Self> {
        let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| BlockchainError::Wallet(format!("Invalid private key format: {}", e)))?;

        tracing::info!(
            address = %signer.address(),
            chain_id = chain_id,
            "Wallet initialized"
        );

        let registered_chains = DashSet::new();
        registered_chains.insert(chain_id);

        Ok(Self {
            signer,
            nonce: Arc::new(AtomicU64::new(0)),
            chain_id: Arc::new(AtomicU64::new(chain_id)),
            registered_chains: Arc::new(registered_chains),
        })
    }

    /// Load wallet from the named environment variable.
    pub fn from_env(var: &str, chain_id: u64) -> BlockchainResult<Self> {
        let private_key = std::env::var(var).map_err(|_| {
            BlockchainError::Wallet(format!("Environment variable {} not set", var))
        })?;

        Self::from_private_key(&private_key, chain_id)
    }

    /// Get the wallet's address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Get the active chain ID.
    pub fn chain_id(&self) -> u64 {
        self.chain_id.load(Ordering::SeqCst)
    }

    /// Make `chain_id` available to [`Wallet::switch_chain`].
    pub fn register_chain(&self, chain_id: u64) {
        if self.registered_chains.insert(chain_id) {
            tracing::info!(address = %self.address(), chain_id, "Chain registered with wallet");
        }
    }

    /// Whether `chain_id` has been registered.
    pub fn is_chain_registered(&self, chain_id: u64) -> bool {
        self.registered_chains.contains(&chain_id)
    }

    /// Switch the active chain. Fails for chains never registered.
    pub fn switch_chain(&self, chain_id: u64) -> BlockchainResult<()> {
        if !self.is_chain_registered(chain_id) {
            return Err(BlockchainError::Wallet(format!("Unrecognized chain {}", chain_id)));
        }
        self.chain_id.store(chain_id, Ordering::SeqCst);
        Ok(())
    }

    /// Get and increment the nonce atomically.
    pub fn get_and_increment_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::SeqCst)
    }

    /// Set the nonce to a specific value (e.g., after querying from chain).
    pub fn set_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    /// Get current nonce without incrementing.
    pub fn current_nonce(&self) -> u64 {
        self.nonce.load(Ordering::SeqCst)
    }

    /// Sign a 32-byte hash (EIP-712 signing hashes, raw digests).
    pub async fn sign_hash(&self, hash: B256) -> BlockchainResult<Signature> {
        self.signer
            .sign_hash(&hash)
            .await
            .map_err(|e| BlockchainError::Wallet(format!("Signing failed: {}", e)))
    }

    /// Network wallet used to sign full transactions.
    pub fn network_wallet(&self) -> EthereumWallet {
        EthereumWallet::from(self.signer.clone())
    }
}
