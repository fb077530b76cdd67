//! Outcome classification policy applied on top of the driver's verdict.

use crate::config::OutcomeConfig;
use crate::model::{Outcome, OutcomeKind};

/// Post-processes driver outcomes and decides which categories are durable.
pub trait OutcomePolicy: Send + Sync + 'static {
    /// Final classification of a driver outcome.
    fn classify(&self, outcome: Outcome) -> Outcome;

    /// Whether items of `kind` go to a checkpoint file.
    fn persists(&self, kind: OutcomeKind) -> bool;
}

/// Policy built from the `[outcomes]` config section.
#[derive(Debug, Clone)]
pub struct ConfiguredPolicy {
    deferred_enabled: bool,
    persist: Vec<OutcomeKind>,
}

impl ConfiguredPolicy {
    pub fn new(config: &OutcomeConfig) -> Self {
        Self {
            deferred_enabled: config.deferred_enabled,
            persist: config.persist.clone(),
        }
    }
}

impl OutcomePolicy for ConfiguredPolicy {
    fn classify(&self, mut outcome: Outcome) -> Outcome {
        if !self.deferred_enabled && outcome.kind == OutcomeKind::DeferredRetryLater {
            outcome.kind = OutcomeKind::Skipped;
        }
        outcome
    }

    fn persists(&self, kind: OutcomeKind) -> bool {
        self.persist.contains(&kind)
    }
}
