//! Signing capability handed to the orchestrator.

use alloy::primitives::{Address, B256};
use alloy::signers::Signature;
use async_trait::async_trait;
use thiserror::Error;

use crate::blockchain::Wallet;
use crate::config::NetworkConfig;
use crate::resilience::classifier::USER_REJECTED_CODE;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The holder of the key refused the request (EIP-1193 code 4001).
    #[error("Signer rejected the request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    /// The signer does not know the chain; it must be added first.
    #[error("Signer does not recognize chain {0}")]
    UnrecognizedChain(u64),

    #[error("Signature request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Signer failure: {0}")]
    Failed(String),
}

impl SignerError {
    pub fn user_rejected(message: impl Into<String>) -> Self {
        SignerError::Rejected {
            code: USER_REJECTED_CODE,
            message: message.into(),
        }
    }
}

/// A key holder able to follow the offer's network and sign digests.
///
/// The local [`Wallet`] implements this; remote or interactive signers can be
/// plugged in behind the same seam.
#[async_trait]
pub trait PaymentSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn chain_id(&self) -> Result<u64, SignerError>;

    /// Make `chain_id` the active chain. Fails with
    /// [`SignerError::UnrecognizedChain`] if the chain was never added.
    async fn switch_chain(&self, chain_id: u64) -> Result<(), SignerError>;

    async fn add_chain(&self, network: &NetworkConfig) -> Result<(), SignerError>;

    async fn sign_hash(&self, hash: B256) -> Result<Signature, SignerError>;
}

#[async_trait]
impl PaymentSigner for Wallet {
    fn address(&self) -> Address {
        Wallet::address(self)
    }

    async fn chain_id(&self) -> Result<u64, SignerError> {
        Ok(Wallet::chain_id(self))
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), SignerError> {
        if !self.is_chain_registered(chain_id) {
            return Err(SignerError::UnrecognizedChain(chain_id));
        }
        Wallet::switch_chain(self, chain_id).map_err(|e| SignerError::Failed(e.to_string()))
    }

    async fn add_chain(&self, network: &NetworkConfig) -> Result<(), SignerError> {
        tracing::debug!(network = %network.name, chain_id = network.chain_id, "Adding chain to wallet");
        self.register_chain(network.chain_id);
        Ok(())
    }

    async fn sign_hash(&self, hash: B256) -> Result<Signature, SignerError> {
        Wallet::sign_hash(self, hash)
            .await
            .map_err(|e| SignerError::Failed(e.to_string()))
    }
}
