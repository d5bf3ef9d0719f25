//! Settlement results and the settlement state machine.

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, SettlementError};

/// Stages of one settlement attempt.
///
/// ```text
/// Idle -> ChallengeReceived -> NetworkAligned -> AuthorizationSigned
///      -> Verified -> Settled -> LedgerAcknowledged
/// ```
/// `Failed` is reachable from every non-terminal stage. `Settled` is terminal
/// when the payment references no ledger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStage {
    Idle,
    ChallengeReceived,
    NetworkAligned,
    AuthorizationSigned,
    Verified,
    Settled,
    LedgerAcknowledged,
    Failed,
}

impl SettlementStage {
    /// Whether `next` directly follows `self`.
    pub fn can_advance_to(self, next: SettlementStage) -> bool {
        use SettlementStage::*;
        match (self, next) {
            (LedgerAcknowledged | Failed, _) => false,
            (_, Failed) => true,
            (Idle, ChallengeReceived)
            | (ChallengeReceived, NetworkAligned)
            | (NetworkAligned, AuthorizationSigned)
            | (AuthorizationSigned, Verified)
            | (Verified, Settled)
            | (Settled, LedgerAcknowledged) => true,
            // Server-side settlement starts from an already signed header.
            (Idle, AuthorizationSigned) => true,
            _ => false,
        }
    }
}

/// Stage bookkeeping for one attempt, logging every transition.
#[derive(Debug)]
pub struct StageTracker {
    payment_id: String,
    stage: SettlementStage,
}

impl StageTracker {
    pub fn new(payment_id: impl Into<String>) -> Self {
        Self {
            payment_id: payment_id.into(),
            stage: SettlementStage::Idle,
        }
    }

    pub fn stage(&self) -> SettlementStage {
        self.stage
    }

    pub fn advance(&mut self, next: SettlementStage) {
        if !self.stage.can_advance_to(next) {
            tracing::error!(
                payment_id = %self.payment_id,
                from = ?self.stage,
                to = ?next,
                "Invalid settlement stage transition"
            );
            debug_assert!(false, "invalid settlement transition {:?} -> {:?}", self.stage, next);
        }
        tracing::debug!(payment_id = %self.payment_id, from = ?self.stage, to = ?next, "Settlement stage");
        self.stage = next;
    }

    /// Move to `Failed` and build the failure result.
    pub fn fail(&mut self, error: SettlementError) -> PaymentResult {
        let failed_at = self.stage;
        self.advance(SettlementStage::Failed);
        tracing::warn!(
            payment_id = %self.payment_id,
            stage = ?failed_at,
            kind = ?error.kind(),
            error = %error,
            "Settlement failed"
        );
        PaymentResult::failure(self.payment_id.clone(), failed_at, error)
    }
}

/// Outcome of a settlement attempt. Exactly one of `tx_hash` and `error` is
/// set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub payment_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub already_paid: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_id: Option<B256>,

    /// Transaction of the ledger acknowledgment, when one was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_tx_hash: Option<B256>,

    /// Stage reached, or the stage that failed.
    pub stage: SettlementStage,
}

impl PaymentResult {
    pub fn success(
        payment_id: impl Into<String>,
        tx_hash: B256,
        settlement_id: B256,
        ledger_tx_hash: Option<B256>,
        stage: SettlementStage,
    ) -> Self {
        Self {
            payment_id: payment_id.into(),
            tx_hash: Some(tx_hash),
            error: None,
            error_kind: None,
            already_paid: false,
            settlement_id: Some(settlement_id),
            ledger_tx_hash,
            stage,
        }
    }

    pub fn failure(payment_id: impl Into<String>, stage: SettlementStage, error: SettlementError) -> Self {
        Self {
            payment_id: payment_id.into(),
            tx_hash: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            already_paid: false,
            settlement_id: None,
            ledger_tx_hash: None,
            stage,
        }
    }

    pub fn already_paid(payment_id: impl Into<String>, tx_hash: B256) -> Self {
        Self {
            payment_id: payment_id.into(),
            tx_hash: Some(tx_hash),
            error: None,
            error_kind: None,
            already_paid: true,
            settlement_id: None,
            ledger_tx_hash: None,
            stage: SettlementStage::Settled,
        }
    }

    pub fn is_success(&self) -> bool {
        self.tx_hash.is_some() && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use SettlementStage::*;
        let path = [Idle, ChallengeReceived, NetworkAligned, AuthorizationSigned, Verified, Settled, LedgerAcknowledged];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(!Idle.can_advance_to(Settled));
        assert!(!Failed.can_advance_to(Idle));
        assert!(!LedgerAcknowledged.can_advance_to(Failed));
        assert!(Verified.can_advance_to(Failed));
    }

    #[test]
    fn test_results_carry_exactly_one_outcome() {
        let ok = PaymentResult::success("p", B256::repeat_byte(1), B256::ZERO, None, SettlementStage::Settled);
        assert!(ok.is_success());
        assert!(ok.error.is_none());

        let mut tracker = StageTracker::new("p");
        tracker.advance(SettlementStage::ChallengeReceived);
        let failed = tracker.fail(SettlementError::VerificationFailed("bad signature".into()));
        assert!(failed.tx_hash.is_none());
        assert_eq!(failed.stage, SettlementStage::ChallengeReceived);
        assert_eq!(failed.error_kind, Some(ErrorKind::VerificationFailed));
        assert_eq!(tracker.stage(), SettlementStage::Failed);
    }

    #[test]
    fn test_already_paid_serialization() {
        let result = PaymentResult::already_paid("pay-1", B256::repeat_byte(2));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["alreadyPaid"], true);
        assert_eq!(json["paymentId"], "pay-1");
        assert!(json.get("error").is_none());

        let failure = PaymentResult::failure("pay-2", SettlementStage::Idle, SettlementError::Network("down".into()));
        let json = serde_json::to_value(&failure).unwrap();
        assert!(json.get("alreadyPaid").is_none());
        assert_eq!(json["errorKind"], "network");
    }
}
