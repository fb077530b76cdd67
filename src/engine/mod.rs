//! Pool engine: probe workers, their circuit breakers, and the controller
//! that starts, pauses and stops them.

pub mod breaker;
pub mod control;
pub mod policy;
pub mod worker;

pub use breaker::{BreakerState, CircuitBreaker};
pub use control::{PoolController, PoolSnapshot};
pub use policy::{ConfiguredPolicy, OutcomePolicy};
pub use worker::{ProbeWorker, WorkerContext, WorkerSettings};

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `duration` unless cancelled first. Returns false on cancel.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
