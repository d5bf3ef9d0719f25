//! Ledger client backed by the deployed contract.
//!
//! # Responsibilities
//! - Encode calls with the `sol!` bindings and read views over `eth_call`
//! - Simulate every write first so reverts decode into typed errors
//! - Sign admin writes with the admin wallet, settlements with the facilitator wallet
//! - Retry reads that fail on the transport; writes are never retried here

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use async_trait::async_trait;

use crate::blockchain::{BlockchainClient, BlockchainError, TxBuilder, Wallet};
use crate::config::{FacilitatorConfig, LedgerConfig, RetryConfig};
use crate::ledger::contract::{decode_ledger_error, to_u64, IPayrollLedger, IERC20};
use crate::ledger::types::{
    LedgerError, LedgerReceipt, LedgerResult, Payee, PaymentRequest, PayrollRun,
};
use crate::ledger::PayrollLedger;
use crate::resilience::{with_retry, RetryPolicy};

/// Seconds to wait for a ledger write to be mined.
const CONFIRMATION_TIMEOUT_SECS: u64 = 120;

/// Which key signs a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Admin,
    Facilitator,
}

/// Map a chain error, decoding ledger custom errors out of revert data.
fn map_chain_error(err: BlockchainError) -> LedgerError {
    let typed = err.revert_data().and_then(|data| decode_ledger_error(data));
    typed.unwrap_or(LedgerError::Chain(err))
}

/// `PayrollLedger` over the deployed contract.
#[derive(Clone, Debug)]
pub struct ContractLedger {
    client: BlockchainClient,
    address: Address,
    asset: Address,
    admin: Option<TxBuilder>,
    facilitator: Option<TxBuilder>,
    retries: RetryConfig,
}

impl ContractLedger {
    pub fn new(
        client: BlockchainClient,
        address: Address,
        asset: Address,
        admin: Option<Wallet>,
        facilitator: Option<Wallet>,
    ) -> Self {
        Self {
            admin: admin.map(|w| TxBuilder::new(client.clone(), w)),
            facilitator: facilitator.map(|w| TxBuilder::new(client.clone(), w)),
            client,
            address,
            asset,
            retries: RetryConfig::default(),
        }
    }

    /// Backoff applied to view calls.
    pub fn with_retries(mut self, retries: RetryConfig) -> Self {
        self.retries = retries;
        self
    }

    /// Build from config. Missing keys are tolerated here and reported as
    /// `Configuration` errors when a write needs them.
    pub fn from_config(
        client: BlockchainClient,
        ledger: &LedgerConfig,
        facilitator: &FacilitatorConfig,
    ) -> LedgerResult<Self> {
        let address: Address = ledger.contract_address.parse().map_err(|e| {
            LedgerError::Configuration(format!(
                "invalid ledger address '{}': {}",
                ledger.contract_address, e
            ))
        })?;
        let asset: Address = facilitator.asset.parse().map_err(|e| {
            LedgerError::Configuration(format!("invalid asset address '{}': {}", facilitator.asset, e))
        })?;

        let chain_id = client.config().chain_id;
        let load = |var: &str, role: &str| match Wallet::from_env(var, chain_id) {
            Ok(wallet) => {
                tracing::info!(role, address = %wallet.address(), "Loaded ledger signer");
                Some(wallet)
            }
            Err(e) => {
                tracing::warn!(role, env = var, error = %e, "Ledger signer unavailable");
                None
            }
        };
        let admin = load(&ledger.admin_key_env, "admin");
        let settler = load(&ledger.facilitator_key_env, "facilitator");

        Ok(Self::new(client, address, asset, admin, settler))
    }

    /// Whether settlements can be acknowledged on-chain.
    pub fn has_facilitator_key(&self) -> bool {
        self.facilitator.is_some()
    }

    /// Account that sends admin writes, if a key is loaded.
    pub fn admin_address(&self) -> Option<Address> {
        self.admin.as_ref().map(TxBuilder::address)
    }

    fn signer(&self, role: Role) -> LedgerResult<&TxBuilder> {
        let signer = match role {
            Role::Admin => self.admin.as_ref(),
            Role::Facilitator => self.facilitator.as_ref(),
        };
        signer.ok_or_else(|| {
            LedgerError::Configuration(format!("no {:?} key configured for ledger writes", role))
        })
    }

    async fn view<C: SolCall + Send>(&self, call: C) -> LedgerResult<C::Return> {
        let input = Bytes::from(call.abi_encode());
        let policy = RetryPolicy::from_config(&self.retries).transient_only();
        let output = with_retry(&policy, || {
            let tx = TransactionRequest::default()
                .with_to(self.address)
                .with_input(input.clone());
            async move { self.client.call(tx).await.map_err(map_chain_error) }
        })
        .await?;
        C::abi_decode_returns(&output).map_err(|e| LedgerError::Decode(e.to_string()))
    }

    /// Simulate, then sign and wait for the write to be mined. Returns the
    /// receipt and the simulated return data.
    async fn write(&self, role: Role, to: Address, data: Vec<u8>) -> LedgerResult<(LedgerReceipt, Bytes)> {
        let signer = self.signer(role)?;
        let data = Bytes::from(data);

        let simulation = TransactionRequest::default()
            .with_from(signer.address())
            .with_to(to)
            .with_input(data.clone());
        let output = self.client.call(simulation).await.map_err(map_chain_error)?;

        let (tx_hash, block_number) = signer
            .submit_and_confirm(to, data, CONFIRMATION_TIMEOUT_SECS)
            .await
            .map_err(map_chain_error)?;

        tracing::info!(tx_hash = %tx_hash, block = block_number, ?role, "Ledger write confirmed");
        Ok((
            LedgerReceipt {
                tx_hash,
                block_number: Some(block_number),
            },
            output,
        ))
    }

    async fn admin_write<C: SolCall + Send>(&self, call: C) -> LedgerResult<LedgerReceipt> {
        Ok(self.write(Role::Admin, self.address, call.abi_encode()).await?.0)
    }
}

#[async_trait]
impl PayrollLedger for ContractLedger {
    fn address(&self) -> Address {
        self.address
    }

    async fn add_payee(&self, payee: Address, salary: U256) -> LedgerResult<LedgerReceipt> {
        self.admin_write(IPayrollLedger::addPayeeCall { payee, salary }).await
    }

    async fn add_payees(&self, payees: &[Address], salaries: &[U256]) -> LedgerResult<LedgerReceipt> {
        self.admin_write(IPayrollLedger::addPayeesCall {
            payees: payees.to_vec(),
            salaries: salaries.to_vec(),
        })
        .await
    }

    async fn update_payee_salary(&self, payee: Address, new_salary: U256) -> LedgerResult<LedgerReceipt> {
        self.admin_write(IPayrollLedger::updatePayeeSalaryCall {
            payee,
            newSalary: new_salary,
        })
        .await
    }

    async fn deactivate_payee(&self, payee: Address) -> LedgerResult<LedgerReceipt> {
        self.admin_write(IPayrollLedger::deactivatePayeeCall { payee }).await
    }

    async fn create_payment_requests(&self) -> LedgerResult<PayrollRun> {
        let call = IPayrollLedger::createPaymentRequestsCall {};
        let (receipt, output) = self.write(Role::Admin, self.address, call.abi_encode()).await?;

        // Return values come from the simulation; the admin key is the only
        // writer of payroll, so the mined call creates the same requests.
        let returns = IPayrollLedger::createPaymentRequestsCall::abi_decode_returns(&output)
            .map_err(|e| LedgerError::Decode(e.to_string()))?;

        Ok(PayrollRun {
            request_ids: returns.requestIds.into_iter().map(to_u64).collect(),
            total_amount: returns.totalAmount,
            receipt,
        })
    }

    async fn mark_payment_settled(
        &self,
        request_id: u64,
        settlement_id: B256,
        tx_hash: B256,
    ) -> LedgerResult<LedgerReceipt> {
        let call = IPayrollLedger::markPaymentSettledCall {
            requestId: U256::from(request_id),
            settlementId: settlement_id,
            txHash: tx_hash,
        };
        Ok(self
            .write(Role::Facilitator, self.address, call.abi_encode())
            .await?
            .0)
    }

    async fn fund_treasury(&self, amount: U256) -> LedgerResult<LedgerReceipt> {
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        let call = IERC20::transferCall {
            to: self.address,
            amount,
        };
        Ok(self.write(Role::Admin, self.asset, call.abi_encode()).await?.0)
    }

    async fn set_revenue_threshold(&self, threshold: U256) -> LedgerResult<LedgerReceipt> {
        self.admin_write(IPayrollLedger::setRevenueThresholdCall { threshold })
            .await
    }

    async fn get_active_payees(&self) -> LedgerResult<Vec<Address>> {
        self.view(IPayrollLedger::getActivePayeesCall {}).await
    }

    async fn get_payee(&self, payee: Address) -> LedgerResult<Option<Payee>> {
        match self.view(IPayrollLedger::getPayeeCall { payee }).await {
            Ok(info) => Ok(info.into_payee()),
            Err(LedgerError::PayeeNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_payment_request(&self, request_id: u64) -> LedgerResult<Option<PaymentRequest>> {
        let call = IPayrollLedger::getPaymentRequestCall {
            requestId: U256::from(request_id),
        };
        match self.view(call).await {
            Ok(info) => Ok(info.into_request()),
            Err(LedgerError::PaymentRequestNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_treasury_balance(&self) -> LedgerResult<U256> {
        self.view(IPayrollLedger::getTreasuryBalanceCall {}).await
    }

    async fn should_trigger_payroll(&self, current_revenue: U256) -> LedgerResult<bool> {
        self.view(IPayrollLedger::shouldTriggerPayrollCall {
            currentRevenue: current_revenue,
        })
        .await
    }

    async fn revenue_threshold(&self) -> LedgerResult<U256> {
        self.view(IPayrollLedger::revenueThresholdCall {}).await
    }
}
