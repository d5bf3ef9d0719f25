//! Payment orchestrator: challenge -> verify -> settle -> ledger acknowledgment.
//!
//! Expected failures (verification, settlement, network, wallet) come back
//! inside a [`PaymentResult`]. Only malformed challenges and missing
//! credentials are raised as `Err`.

use alloy::primitives::{keccak256, Address, B256, U256};
use dashmap::DashSet;
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::config::FacilitatorConfig;
use crate::error::SettlementError;
use crate::events::{ContractEvent, LedgerEvent};
use crate::facilitator::{Facilitator, PaymentChallenge, PaymentRequirements, SCHEME_EXACT};
use crate::ledger::{Clock, LedgerError, PayrollLedger, SystemClock};
use crate::observability::metrics;
use crate::payments::authorization::{
    asset_domain, authorization_for, decode_header, encode_header, recover_signer, sign_authorization,
};
use crate::payments::networks::NetworkRegistry;
use crate::payments::receipts::{PaymentReceipt, PaymentReceipts};
use crate::payments::signer::{PaymentSigner, SignerError};
use crate::payments::types::{PaymentResult, SettlementStage, StageTracker};
use crate::resilience::classifier::{classify, revert_reason, user_friendly_message, Category};
use crate::resilience::with_timeout;

/// Map a subsystem failure onto the settlement taxonomy. Failures that are
/// neither transport, revert nor wallet related take the stage's own kind.
fn settlement_error(err: &(dyn Error + 'static), stage_kind: fn(String) -> SettlementError) -> SettlementError {
    match classify(err) {
        Category::Wallet => SettlementError::WalletRejection(user_friendly_message(err)),
        Category::Network => SettlementError::Network(err.to_string()),
        Category::Contract => SettlementError::Contract {
            message: err.to_string(),
            reason: revert_reason(err),
        },
        Category::Other => stage_kind(err.to_string()),
    }
}

/// Settlement id sent to the ledger when the facilitator does not supply one.
pub fn fallback_settlement_id(payment_id: &str) -> B256 {
    keccak256(payment_id.as_bytes())
}

/// Payment id of offers issued for ledger request `request_id`.
pub fn request_payment_id(request_id: u64) -> String {
    format!("request-{}", request_id)
}

/// Releases the in-flight slot when dropped.
struct InFlightGuard {
    slots: Arc<DashSet<String>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.slots.remove(&self.key);
    }
}

/// Drives settlement attempts. Constructed once and shared.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    facilitator: Arc<dyn Facilitator>,
    ledger: Arc<dyn PayrollLedger>,
    receipts: PaymentReceipts,
    networks: NetworkRegistry,
    config: FacilitatorConfig,
    clock: Arc<dyn Clock>,
    in_flight: Arc<DashSet<String>>,
}

impl PaymentOrchestrator {
    pub fn new(
        facilitator: Arc<dyn Facilitator>,
        ledger: Arc<dyn PayrollLedger>,
        receipts: PaymentReceipts,
        networks: NetworkRegistry,
        config: FacilitatorConfig,
    ) -> Self {
        Self {
            facilitator,
            ledger,
            receipts,
            networks,
            config,
            clock: Arc::new(SystemClock),
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn receipts(&self) -> &PaymentReceipts {
        &self.receipts
    }

    pub fn ledger(&self) -> &Arc<dyn PayrollLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &FacilitatorConfig {
        &self.config
    }

    /// Current time on the orchestrator's clock, in unix seconds.
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    fn claim(&self, key: String) -> Result<InFlightGuard, SettlementError> {
        if !self.in_flight.insert(key.clone()) {
            return Err(SettlementError::InFlight(key));
        }
        Ok(InFlightGuard {
            slots: self.in_flight.clone(),
            key,
        })
    }

    /// Whether an attempt holding `key` is running.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains(key)
    }

    /// Run the full client-side flow for `challenge`, signing with `signer`.
    pub async fn process_challenge(
        &self,
        challenge: &PaymentChallenge,
        signer: &dyn PaymentSigner,
    ) -> Result<PaymentResult, SettlementError> {
        let start = Instant::now();
        let (offer, payment_id) = validate_offer(challenge)?;
        let request_id = offer.extra.ledger_request_id();

        let mut tracker = StageTracker::new(payment_id.clone());
        tracker.advance(SettlementStage::ChallengeReceived);
        tracing::info!(
            payment_id = %payment_id,
            network = %offer.network,
            pay_to = %offer.pay_to,
            amount = %offer.max_amount_required,
            "Processing payment challenge"
        );

        let _guard = match self.claim(flight_key(request_id, &payment_id)) {
            Ok(guard) => guard,
            Err(e) => return Ok(self.finish(tracker.fail(e), start)),
        };

        if let Some(paid) = self
            .check_already_paid(offer.pay_to, offer.max_amount_required, request_id)
            .await?
        {
            metrics::record_settlement("already_paid", start);
            return Ok(paid);
        }

        let network = match self.networks.resolve(&offer.network) {
            Some(network) => network,
            None => {
                let err = SettlementError::ChainSwitch(format!("unknown network '{}'", offer.network));
                return Ok(self.finish(tracker.fail(err), start));
            }
        };
        if let Err(e) = align_network(signer, &network).await {
            return Ok(self.finish(tracker.fail(e), start));
        }
        tracker.advance(SettlementStage::NetworkAligned);

        let issued_at = self.clock.now();
        let auth = authorization_for(signer.address(), offer, issued_at);
        let domain = asset_domain(
            offer.extra.name.as_deref().unwrap_or(&self.config.asset_name),
            offer.extra.version.as_deref().unwrap_or(&self.config.asset_version),
            network.chain_id,
            offer.asset,
        );
        let timeout_secs = self.config.signature_timeout_secs;
        let signed = with_timeout(
            Duration::from_secs(timeout_secs),
            sign_authorization(signer, &auth, &domain, &offer.network, offer.asset),
            |_| SignerError::Timeout(timeout_secs),
        )
        .await;
        let payload = match signed {
            Ok(payload) => payload,
            Err(e) => {
                let err = settlement_error(&e, SettlementError::WalletRejection);
                return Ok(self.finish(tracker.fail(err), start));
            }
        };
        let header = encode_header(&payload)?;
        tracker.advance(SettlementStage::AuthorizationSigned);

        let result = self
            .redeem(&mut tracker, &header, offer, &payment_id, request_id)
            .await?;
        Ok(self.finish(result, start))
    }

    /// Server half of the flow for a header signed elsewhere.
    pub async fn settle_authorization(
        &self,
        payment_header: &str,
        requirements: &PaymentRequirements,
        user_address: Option<Address>,
    ) -> Result<PaymentResult, SettlementError> {
        let start = Instant::now();
        let payment_id = requirements
            .extra
            .payment_id
            .clone()
            .ok_or_else(|| SettlementError::InvalidChallenge("offer has no extra.paymentId".to_string()))?;
        let payload = decode_header(payment_header)?;
        let request_id = requirements.extra.ledger_request_id();

        let mut tracker = StageTracker::new(payment_id.clone());
        let _guard = match self.claim(flight_key(request_id, &payment_id)) {
            Ok(guard) => guard,
            Err(e) => return Ok(self.finish(tracker.fail(e), start)),
        };

        if let Some(paid) = self
            .check_already_paid(requirements.pay_to, requirements.max_amount_required, request_id)
            .await?
        {
            metrics::record_settlement("already_paid", start);
            return Ok(paid);
        }

        if let Err(reason) = self.check_payload(&payload.payload, requirements, &payload.network, user_address) {
            return Ok(self.finish(tracker.fail(SettlementError::VerificationFailed(reason)), start));
        }
        tracker.advance(SettlementStage::AuthorizationSigned);

        if self.clock.now() >= payload.payload.valid_before {
            let err = SettlementError::SettlementFailed("payment authorization expired".to_string());
            return Ok(self.finish(tracker.fail(err), start));
        }

        let result = self
            .redeem(&mut tracker, payment_header, requirements, &payment_id, request_id)
            .await?;
        Ok(self.finish(result, start))
    }

    /// Reject payloads that do not authorize exactly this offer.
    fn check_payload(
        &self,
        auth: &crate::facilitator::ExactAuthorization,
        offer: &PaymentRequirements,
        network: &str,
        user_address: Option<Address>,
    ) -> Result<(), String> {
        if !network.eq_ignore_ascii_case(&offer.network) {
            return Err(format!("payload network {} does not match offer {}", network, offer.network));
        }
        if auth.to != offer.pay_to || auth.asset != offer.asset {
            return Err("authorization is not scoped to this payee and asset".to_string());
        }
        if auth.value != offer.max_amount_required {
            return Err(format!(
                "authorized value {} does not match required {}",
                auth.value, offer.max_amount_required
            ));
        }
        if let Some(user) = user_address {
            if user != auth.from {
                return Err(format!("authorization signed for {} not {}", auth.from, user));
            }
        }
        if let Some(network) = self.networks.resolve(&offer.network) {
            let domain = asset_domain(
                offer.extra.name.as_deref().unwrap_or(&self.config.asset_name),
                offer.extra.version.as_deref().unwrap_or(&self.config.asset_version),
                network.chain_id,
                offer.asset,
            );
            if recover_signer(auth, &domain) != Some(auth.from) {
                return Err("authorization signature does not match its sender".to_string());
            }
        }
        Ok(())
    }

    /// Verify, settle and acknowledge on the ledger.
    async fn redeem(
        &self,
        tracker: &mut StageTracker,
        header: &str,
        offer: &PaymentRequirements,
        payment_id: &str,
        request_id: Option<u64>,
    ) -> Result<PaymentResult, SettlementError> {
        match self.facilitator.verify(header, offer).await {
            Ok(response) if response.is_valid => {}
            Ok(response) => {
                let reason = response
                    .invalid_reason
                    .unwrap_or_else(|| "authorization rejected by facilitator".to_string());
                return Ok(tracker.fail(SettlementError::VerificationFailed(reason)));
            }
            Err(e) => return Ok(tracker.fail(settlement_error(&e, SettlementError::VerificationFailed))),
        }
        tracker.advance(SettlementStage::Verified);

        let response = match self.facilitator.settle(header, offer).await {
            Ok(response) => response,
            Err(e) => return Ok(tracker.fail(settlement_error(&e, SettlementError::SettlementFailed))),
        };
        let tx_hash = match response.settled_tx_hash() {
            Some(hash) => hash,
            None => {
                return Ok(tracker.fail(SettlementError::SettlementFailed(response.failure_reason())));
            }
        };
        let settlement_id = response
            .settlement_id()
            .unwrap_or_else(|| fallback_settlement_id(payment_id));
        tracker.advance(SettlementStage::Settled);
        tracing::info!(payment_id, tx_hash = %tx_hash, "Facilitator settled payment");

        let receipt = PaymentReceipt {
            payment_id: payment_id.to_string(),
            payee: offer.pay_to,
            amount: offer.max_amount_required,
            tx_hash,
            settlement_id,
            request_id,
            ledger_acknowledged: false,
            settled_at: self.clock.now(),
        };
        self.receipts.record(receipt.clone());

        let Some(request_id) = request_id else {
            return Ok(PaymentResult::success(payment_id, tx_hash, settlement_id, None, tracker.stage()));
        };

        match self.acknowledge(&receipt, request_id).await {
            Ok(ledger_tx) => {
                tracker.advance(SettlementStage::LedgerAcknowledged);
                Ok(PaymentResult::success(
                    payment_id,
                    tx_hash,
                    settlement_id,
                    ledger_tx,
                    tracker.stage(),
                ))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(tracker.fail(e)),
        }
    }

    /// Record the settlement on the ledger. An already-settled request
    /// counts as acknowledged.
    async fn acknowledge(&self, receipt: &PaymentReceipt, request_id: u64) -> Result<Option<B256>, SettlementError> {
        let outcome = self
            .ledger
            .mark_payment_settled(request_id, receipt.settlement_id, receipt.tx_hash)
            .await;
        let ledger_tx = match outcome {
            Ok(ledger_receipt) => Some(ledger_receipt.tx_hash),
            Err(LedgerError::PaymentAlreadySettled(_)) => {
                tracing::info!(request_id, "Ledger request already settled");
                None
            }
            Err(LedgerError::Configuration(message)) => {
                return Err(SettlementError::Configuration(message));
            }
            Err(e) => {
                tracing::warn!(request_id, error = %e, "Ledger acknowledgment failed");
                return Err(SettlementError::LedgerReconciliationFailed(format!(
                    "payment settled in {} but the ledger was not updated: {}",
                    receipt.tx_hash,
                    user_friendly_message(&e)
                )));
            }
        };
        self.receipts.mark_acknowledged(receipt.payee, receipt.amount);
        tracing::info!(request_id, ledger_tx = ?ledger_tx, "Ledger acknowledged settlement");
        Ok(ledger_tx)
    }

    /// Prior settlement of `(payee, amount)` inside the tracking window, or
    /// of ledger request `request_id` at any age. A receipt whose ledger
    /// acknowledgment never landed gets it retried; the payment itself is
    /// never repeated.
    pub async fn check_already_paid(
        &self,
        payee: Address,
        amount: U256,
        request_id: Option<u64>,
    ) -> Result<Option<PaymentResult>, SettlementError> {
        let now = self.clock.now();
        let receipt = match request_id.and_then(|id| self.receipts.find_by_request(id)) {
            Some(receipt) => Some(receipt),
            // Past the window only a receipt for this same request counts.
            None => self.receipts.lookup(payee, amount, now).filter(|r| {
                self.receipts.in_window(r, now) || r.request_id.is_none() || request_id.is_none()
            }),
        };
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        tracing::info!(payment_id = %receipt.payment_id, tx_hash = %receipt.tx_hash, "Payment already settled");

        if !receipt.ledger_acknowledged {
            if let Some(id) = receipt.request_id.or(request_id) {
                match self.acknowledge(&receipt, id).await {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => tracing::warn!(request_id = id, error = %e, "Ledger acknowledgment retry failed"),
                }
            }
        }
        Ok(Some(PaymentResult::already_paid(receipt.payment_id, receipt.tx_hash)))
    }

    /// Fold a `PaymentSettled` ledger event into the receipts.
    pub async fn record_ledger_settlement(
        &self,
        request_id: u64,
        settlement_id: B256,
        tx_hash: B256,
    ) -> Result<(), LedgerError> {
        if let Some(receipt) = self.receipts.find_by_request(request_id) {
            self.receipts.mark_acknowledged(receipt.payee, receipt.amount);
            return Ok(());
        }
        let Some(request) = self.ledger.get_payment_request(request_id).await? else {
            return Err(LedgerError::PaymentRequestNotFound(request_id));
        };
        self.receipts.record(PaymentReceipt {
            payment_id: request_payment_id(request_id),
            payee: request.payee,
            amount: request.amount,
            tx_hash,
            settlement_id,
            request_id: Some(request_id),
            ledger_acknowledged: true,
            settled_at: self.clock.now(),
        });
        Ok(())
    }

    /// Record every `PaymentSettled` event from `events` until `shutdown`
    /// fires or the stream closes.
    pub async fn follow_ledger_settlements(
        self,
        mut events: broadcast::Receiver<ContractEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.recv() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(ContractEvent {
                    args:
                        LedgerEvent::PaymentSettled {
                            request_id,
                            settlement_id,
                            tx_hash,
                        },
                    ..
                }) => {
                    if let Err(e) = self.record_ledger_settlement(request_id, settlement_id, tx_hash).await {
                        tracing::warn!(request_id, error = %e, "Failed to record ledger settlement");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Settlement follower lagged behind the event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Settlement follower stopped");
    }

    fn finish(&self, result: PaymentResult, start: Instant) -> PaymentResult {
        let outcome = match (&result.error, result.stage) {
            (None, _) => "settled",
            (Some(_), SettlementStage::Settled) => "reconcile_failed",
            (Some(_), _) => "failed",
        };
        metrics::record_settlement(outcome, start);
        result
    }
}

impl std::fmt::Debug for PaymentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentOrchestrator")
            .field("ledger", &self.ledger.address())
            .field("receipts", &self.receipts.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

fn flight_key(request_id: Option<u64>, payment_id: &str) -> String {
    match request_id {
        Some(id) => format!("request:{}", id),
        None => format!("payment:{}", payment_id),
    }
}

fn validate_offer(challenge: &PaymentChallenge) -> Result<(&PaymentRequirements, String), SettlementError> {
    let offer = challenge
        .offer()
        .ok_or_else(|| SettlementError::InvalidChallenge("challenge has no offers".to_string()))?;
    let payment_id = offer
        .extra
        .payment_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SettlementError::InvalidChallenge("offer has no extra.paymentId".to_string()))?;
    if offer.scheme != SCHEME_EXACT {
        return Err(SettlementError::InvalidChallenge(format!(
            "unsupported payment scheme '{}'",
            offer.scheme
        )));
    }
    Ok((offer, payment_id))
}

/// Put the signer on `network`, adding the chain first if the signer does
/// not know it.
async fn align_network(
    signer: &dyn PaymentSigner,
    network: &crate::config::NetworkConfig,
) -> Result<(), SettlementError> {
    let to_switch_error = |e: SignerError| SettlementError::ChainSwitch(e.to_string());

    let current = signer.chain_id().await.map_err(to_switch_error)?;
    if current == network.chain_id {
        return Ok(());
    }
    tracing::info!(from = current, to = network.chain_id, network = %network.name, "Switching signer chain");

    match signer.switch_chain(network.chain_id).await {
        Ok(()) => {}
        Err(SignerError::UnrecognizedChain(_)) => {
            signer.add_chain(network).await.map_err(to_switch_error)?;
            signer.switch_chain(network.chain_id).await.map_err(to_switch_error)?;
        }
        Err(e) => return Err(to_switch_error(e)),
    }

    let active = signer.chain_id().await.map_err(to_switch_error)?;
    if active != network.chain_id {
        return Err(SettlementError::ChainSwitch(format!(
            "signer is on chain {} after switching to {}",
            active, network.chain_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Wallet;
    use crate::facilitator::{FacilitatorError, SettleResponse, VerifyResponse, EVENT_SETTLED};
    use crate::ledger::{InMemoryLedger, ManualClock};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TEST_PRIVATE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const SETTLE_TX: &str = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";

    #[derive(Default)]
    struct StubFacilitator {
        reject_verify: bool,
        settle_event: Option<String>,
        verifies: AtomicUsize,
        settles: AtomicUsize,
    }

    #[async_trait]
    impl Facilitator for StubFacilitator {
        async fn verify(&self, _: &str, _: &PaymentRequirements) -> Result<VerifyResponse, FacilitatorError> {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            Ok(VerifyResponse {
                is_valid: !self.reject_verify,
                invalid_reason: self.reject_verify.then(|| "invalid_signature".to_string()),
            })
        }

        async fn settle(&self, _: &str, _: &PaymentRequirements) -> Result<SettleResponse, FacilitatorError> {
            self.settles.fetch_add(1, Ordering::SeqCst);
            Ok(SettleResponse {
                event: self.settle_event.clone().unwrap_or_else(|| EVENT_SETTLED.to_string()),
                tx_hash: Some(SETTLE_TX.to_string()),
                ..SettleResponse::default()
            })
        }
    }

    fn challenge(request_id: Option<u64>) -> PaymentChallenge {
        let mut extra = serde_json::json!({ "paymentId": "pay-1" });
        if let Some(id) = request_id {
            extra["requestId"] = serde_json::json!(id.to_string());
        }
        serde_json::from_value(serde_json::json!({
            "x402Version": 1,
            "accepts": [{
                "scheme": "exact",
                "network": "cronos-testnet",
                "asset": "0xc01efaaf7c5c61bebfaeb358e1161b537b8bc0e0",
                "payTo": "0x1111111111111111111111111111111111111111",
                "maxAmountRequired": "1000000",
                "maxTimeoutSeconds": 300,
                "extra": extra
            }]
        }))
        .unwrap()
    }

    fn orchestrator(facilitator: Arc<StubFacilitator>) -> PaymentOrchestrator {
        let ledger = InMemoryLedger::builder().build();
        PaymentOrchestrator::new(
            facilitator,
            Arc::new(ledger),
            PaymentReceipts::new(3600, None),
            NetworkRegistry::default(),
            FacilitatorConfig::default(),
        )
        .with_clock(Arc::new(ManualClock::new(1_700_000_000)))
    }

    fn wallet() -> Wallet {
        Wallet::from_private_key(TEST_PRIVATE_KEY, 1).unwrap()
    }

    #[tokio::test]
    async fn test_settles_and_switches_chain() {
        let facilitator = Arc::new(StubFacilitator::default());
        let orchestrator = orchestrator(facilitator.clone());
        let signer = wallet();

        let result = orchestrator.process_challenge(&challenge(None), &signer).await.unwrap();
        assert!(result.is_success(), "{:?}", result);
        assert_eq!(result.tx_hash, Some(SETTLE_TX.parse().unwrap()));
        assert_eq!(result.settlement_id, Some(fallback_settlement_id("pay-1")));
        assert_eq!(result.stage, SettlementStage::Settled);
        assert_eq!(signer.chain_id(), 338);
        assert!(!orchestrator.is_in_flight("payment:pay-1"));
    }

    #[tokio::test]
    async fn test_invalid_challenge_is_raised() {
        let orchestrator = orchestrator(Arc::new(StubFacilitator::default()));
        let empty = PaymentChallenge {
            protocol_version: 1,
            offers: vec![],
            error: None,
        };
        assert!(matches!(
            orchestrator.process_challenge(&empty, &wallet()).await,
            Err(SettlementError::InvalidChallenge(_))
        ));

        let mut missing_id = challenge(None);
        missing_id.offers[0].extra.payment_id = None;
        assert!(matches!(
            orchestrator.process_challenge(&missing_id, &wallet()).await,
            Err(SettlementError::InvalidChallenge(_))
        ));
    }

    #[tokio::test]
    async fn test_verification_failure_is_a_result() {
        let facilitator = Arc::new(StubFacilitator {
            reject_verify: true,
            ..StubFacilitator::default()
        });
        let orchestrator = orchestrator(facilitator.clone());

        let result = orchestrator.process_challenge(&challenge(None), &wallet()).await.unwrap();
        assert!(result.tx_hash.is_none());
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::VerificationFailed));
        assert_eq!(facilitator.settles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_settlement_is_failure() {
        let facilitator = Arc::new(StubFacilitator {
            settle_event: Some("payment.pending".to_string()),
            ..StubFacilitator::default()
        });
        let orchestrator = orchestrator(facilitator);

        let result = orchestrator.process_challenge(&challenge(None), &wallet()).await.unwrap();
        assert!(result.tx_hash.is_none());
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::SettlementFailed));
        assert!(orchestrator.receipts().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_network_fails_alignment() {
        let orchestrator = orchestrator(Arc::new(StubFacilitator::default()));
        let mut challenge = challenge(None);
        challenge.offers[0].network = "solana".to_string();

        let result = orchestrator.process_challenge(&challenge, &wallet()).await.unwrap();
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::ChainSwitch));
    }

    #[tokio::test]
    async fn test_second_attempt_is_already_paid() {
        let facilitator = Arc::new(StubFacilitator::default());
        let orchestrator = orchestrator(facilitator.clone());

        let first = orchestrator.process_challenge(&challenge(None), &wallet()).await.unwrap();
        let second = orchestrator.process_challenge(&challenge(None), &wallet()).await.unwrap();

        assert!(second.already_paid);
        assert_eq!(second.tx_hash, first.tx_hash);
        assert_eq!(facilitator.settles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_attempt_is_rejected() {
        let orchestrator = orchestrator(Arc::new(StubFacilitator::default()));
        let _held = orchestrator.claim(flight_key(Some(4), "pay-1")).unwrap();

        let result = orchestrator.process_challenge(&challenge(Some(4)), &wallet()).await.unwrap();
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::InFlight));
    }

    #[tokio::test]
    async fn test_settle_authorization_rejects_foreign_payload() {
        let orchestrator = orchestrator(Arc::new(StubFacilitator::default()));
        let signer = wallet();
        signer.register_chain(338);
        signer.switch_chain(338).unwrap();

        let offer = challenge(None).offers[0].clone();
        let auth = authorization_for(signer.address(), &offer, 1_700_000_000);
        let domain = asset_domain("Bridged USDC (Stargate)", "1", 338, offer.asset);
        let payload = sign_authorization(&signer, &auth, &domain, &offer.network, offer.asset)
            .await
            .unwrap();
        let header = encode_header(&payload).unwrap();

        let mut other = offer.clone();
        other.max_amount_required = U256::from(5);
        let result = orchestrator.settle_authorization(&header, &other, None).await.unwrap();
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::VerificationFailed));

        let result = orchestrator
            .settle_authorization(&header, &offer, Some(signer.address()))
            .await
            .unwrap();
        assert!(result.is_success(), "{:?}", result);
    }

    #[tokio::test]
    async fn test_expired_authorization_is_settlement_failure() {
        let facilitator = Arc::new(StubFacilitator::default());
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let orchestrator = orchestrator(facilitator.clone()).with_clock(clock.clone());
        let signer = wallet();
        signer.register_chain(338);
        signer.switch_chain(338).unwrap();

        let offer = challenge(None).offers[0].clone();
        let auth = authorization_for(signer.address(), &offer, clock.now());
        let domain = asset_domain("Bridged USDC (Stargate)", "1", 338, offer.asset);
        let payload = sign_authorization(&signer, &auth, &domain, &offer.network, offer.asset)
            .await
            .unwrap();
        let header = encode_header(&payload).unwrap();

        clock.advance(300);
        let result = orchestrator.settle_authorization(&header, &offer, None).await.unwrap();
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::SettlementFailed));
        assert_eq!(facilitator.settles.load(Ordering::SeqCst), 0);
    }
}
