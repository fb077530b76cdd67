//! Worker span helpers.
//!
//! Every worker runs inside its own span so all of its log lines carry the
//! worker number and identity. State changes are recorded as events on it.

use crate::model::{Identity, WorkerState};
use tracing::Span;

/// Start the long-lived span for one worker.
///
/// The `worker.state` field is declared empty and updated via
/// [`record_state_transition`].
pub fn worker_span(identity: &Identity) -> Span {
    tracing::info_span!(
        "probe.worker",
        "worker.id" = identity.worker,
        "worker.identity" = %identity.token,
        "worker.state" = tracing::field::Empty,
    )
}

/// Record a worker state transition on its span.
pub fn record_state_transition(span: &Span, from: WorkerState, to: WorkerState) {
    span.record("worker.state", tracing::field::display(to));
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
}
