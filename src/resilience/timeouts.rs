//! Timeout enforcement.
//!
//! Every external call (RPC, facilitator, signer, ledger write) runs under a
//! deadline. A timeout is reported as its own error value so callers can
//! classify it as a transient failure.

use std::future::Future;
use std::time::Duration;

/// The deadline elapsed before the operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation timed out after {0:?}")]
pub struct Elapsed(pub Duration);

/// Run `fut` under `limit`. The inner result is flattened: the caller maps
/// `Elapsed` into its own error type with `on_timeout`.
pub async fn with_timeout<T, E, F>(
    limit: Duration,
    fut: F,
    on_timeout: impl FnOnce(Elapsed) -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(Elapsed(limit))),
    }
}
