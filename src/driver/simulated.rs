//! Simulated target for dry runs and demos.
//!
//! Classifies items pseudo-randomly with fixed weights after a random
//! latency. No external resource is touched.

use super::{DriverError, SessionDriver};
use crate::model::{Identity, Outcome, OutcomeKind, WorkItem};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome weights and timings for the simulated target.
#[derive(Debug, Clone)]
pub struct SimulatedProfile {
    pub acquire_delay: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub success: u32,
    pub deferred: u32,
    pub skipped: u32,
    pub already_done: u32,
    pub error: u32,
}

impl Default for SimulatedProfile {
    fn default() -> Self {
        Self {
            acquire_delay: Duration::from_millis(200),
            min_latency: Duration::from_millis(20),
            max_latency: Duration::from_millis(120),
            success: 2,
            deferred: 3,
            skipped: 85,
            already_done: 2,
            error: 8,
        }
    }
}

impl SimulatedProfile {
    fn pick(&self, roll: u64) -> OutcomeKind {
        let weights = [
            (OutcomeKind::Success, self.success),
            (OutcomeKind::DeferredRetryLater, self.deferred),
            (OutcomeKind::Skipped, self.skipped),
            (OutcomeKind::AlreadyDone, self.already_done),
            (OutcomeKind::Error, self.error),
        ];
        let mut acc = 0u64;
        for (kind, weight) in weights {
            acc += u64::from(weight);
            if roll < acc {
                return kind;
            }
        }
        OutcomeKind::Skipped
    }

    /// Sum of all weights. Five `u32` weights always fit in a `u64`.
    fn total(&self) -> u64 {
        [self.success, self.deferred, self.skipped, self.already_done, self.error]
            .into_iter()
            .map(u64::from)
            .sum()
    }
}

pub struct SimulatedDriver {
    profile: SimulatedProfile,
}

pub struct SimulatedSession {
    identity: String,
    rng: StdRng,
    probes: u64,
}

impl SimulatedDriver {
    pub fn new(profile: SimulatedProfile) -> Self {
        Self { profile }
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new(SimulatedProfile::default())
    }
}

#[async_trait]
impl SessionDriver for SimulatedDriver {
    type Session = SimulatedSession;

    async fn acquire(
        &self,
        identity: &Identity,
        cancel: &CancellationToken,
    ) -> Result<SimulatedSession, DriverError> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(DriverError::Cancelled),
            _ = tokio::time::sleep(self.profile.acquire_delay) => {}
        }
        debug!(identity = %identity, "simulated session opened");
        Ok(SimulatedSession {
            identity: identity.token.clone(),
            rng: StdRng::from_entropy(),
            probes: 0,
        })
    }

    async fn submit(
        &self,
        session: &mut SimulatedSession,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> Outcome {
        let (latency, roll) = {
            let min = self.profile.min_latency.as_millis() as u64;
            let max = (self.profile.max_latency.as_millis() as u64).max(min);
            let latency = Duration::from_millis(session.rng.gen_range(min..=max));
            let roll = session.rng.gen_range(0..self.profile.total().max(1));
            (latency, roll)
        };
        session.probes += 1;

        tokio::select! {
            _ = cancel.cancelled() => {
                return Outcome::error(item.clone(), "cancelled mid-probe");
            }
            _ = tokio::time::sleep(latency) => {}
        }

        match self.profile.pick(roll) {
            OutcomeKind::Error => Outcome::error(item.clone(), "simulated target fault"),
            kind => Outcome::new(item.clone(), kind),
        }
    }

    async fn release(&self, session: SimulatedSession) {
        debug!(
            identity = %session.identity,
            probes = session.probes,
            "simulated session closed"
        );
    }
}
