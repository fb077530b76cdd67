//! Session driver contract.
//!
//! A driver owns everything target-specific: how a session is opened (including
//! any manual login), how one item is probed, and how the result is classified.
//! The pool only sees this trait. Each worker holds its own session for its
//! whole lifetime; sessions are never shared across workers.

pub mod simulated;

use crate::model::{Identity, Outcome, WorkItem};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use simulated::{SimulatedDriver, SimulatedProfile};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("session acquisition failed: {0}")]
    Acquire(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// Drives interactive probe sessions against one target.
#[async_trait]
pub trait SessionDriver: Send + Sync + 'static {
    /// One live interactive session.
    type Session: Send + 'static;

    /// Open a session for `identity`. May wait a long time for a human to
    /// authenticate; should return [`DriverError::Cancelled`] promptly once
    /// `cancel` fires.
    async fn acquire(
        &self,
        identity: &Identity,
        cancel: &CancellationToken,
    ) -> Result<Self::Session, DriverError>;

    /// Probe one item and classify the result. Failures are reported as
    /// [`crate::model::OutcomeKind::Error`] outcomes, never as panics. Every
    /// internal wait should be bounded and should poll `cancel`.
    async fn submit(
        &self,
        session: &mut Self::Session,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> Outcome;

    /// Tear the session down. Called exactly once per acquired session.
    async fn release(&self, session: Self::Session);
}
