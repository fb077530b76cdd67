//! Core data model.
//!
//! A work item is one generated probe identifier. Probing it yields an
//! outcome, which lands in a per-category checkpoint file. Workers move
//! through a small lifecycle while they own a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A generated probe identifier: a configured prefix followed by a
/// fixed-width digit suffix. Consumed exactly once by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem(String);

impl WorkItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkItem {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Classified result of probing one work item. Doubles as the checkpoint
/// category key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    #[serde(rename = "deferred")]
    DeferredRetryLater,
    Skipped,
    AlreadyDone,
    Error,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 5] = [
        OutcomeKind::Success,
        OutcomeKind::DeferredRetryLater,
        OutcomeKind::Skipped,
        OutcomeKind::AlreadyDone,
        OutcomeKind::Error,
    ];

    /// Only errors count toward a worker's consecutive-failure streak.
    pub fn is_failure(self) -> bool {
        matches!(self, OutcomeKind::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::DeferredRetryLater => "deferred",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::AlreadyDone => "already_done",
            OutcomeKind::Error => "error",
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" | "valid" => Ok(OutcomeKind::Success),
            "deferred" | "deferred_retry_later" | "regsoon" => Ok(OutcomeKind::DeferredRetryLater),
            "skipped" | "skip" => Ok(OutcomeKind::Skipped),
            "already_done" | "already" => Ok(OutcomeKind::AlreadyDone),
            "error" => Ok(OutcomeKind::Error),
            other => Err(format!("unknown outcome category: {other}")),
        }
    }
}

/// The result of one probe, as produced by a session driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub item: WorkItem,
    pub kind: OutcomeKind,
    pub at: DateTime<Utc>,
    /// Free-form context from the driver, e.g. the failure reason.
    pub detail: Option<String>,
}

impl Outcome {
    pub fn new(item: WorkItem, kind: OutcomeKind) -> Self {
        Self {
            item,
            kind,
            at: Utc::now(),
            detail: None,
        }
    }

    pub fn success(item: WorkItem) -> Self {
        Self::new(item, OutcomeKind::Success)
    }

    pub fn deferred(item: WorkItem) -> Self {
        Self::new(item, OutcomeKind::DeferredRetryLater)
    }

    pub fn skipped(item: WorkItem) -> Self {
        Self::new(item, OutcomeKind::Skipped)
    }

    pub fn already_done(item: WorkItem) -> Self {
        Self::new(item, OutcomeKind::AlreadyDone)
    }

    pub fn error(item: WorkItem, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(item, OutcomeKind::Error)
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The opaque per-worker token handed to the session driver (for example an
/// isolated browser profile directory). Unique within one pool run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// 1-based worker number this identity is bound to.
    pub worker: usize,
    pub token: String,
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.token)
    }
}

// ---------------------------------------------------------------------------
// Worker State
// ---------------------------------------------------------------------------

/// Lifecycle state of a probe worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Spawned, no session yet.
    Idle,
    /// Acquiring a session; may include a human authentication phase.
    WaitingAuth,
    /// Drawing and probing work items.
    Running,
    /// Holding its session, drawing nothing.
    Paused,
    /// Circuit open: session released, cooling down before reacquire.
    Restarting,
    /// Session released, loop exited. Terminal.
    Closed,
}

impl WorkerState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, to),
            (Idle, WaitingAuth)
                | (Idle, Closed)
                | (WaitingAuth, Running)
                | (WaitingAuth, Closed)   // acquire failed or cancelled
                | (Running, Paused)
                | (Running, Restarting)
                | (Running, Closed)
                | (Paused, Running)
                | (Paused, Closed)
                | (Restarting, Running)
                | (Restarting, Closed) // reacquire failed
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Closed)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::WaitingAuth => "waiting_auth",
            WorkerState::Running => "running",
            WorkerState::Paused => "paused",
            WorkerState::Restarting => "restarting",
            WorkerState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time view of one worker, published by the worker itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker: usize,
    pub identity: String,
    pub state: WorkerState,
    /// Item currently being probed, if any.
    pub current: Option<WorkItem>,
    pub consecutive_errors: u32,
    pub done: u64,
    pub restarts: u64,
    /// Items per second over the last rate window.
    pub rate: f64,
}

impl WorkerStatus {
    pub fn new(identity: &Identity) -> Self {
        Self {
            worker: identity.worker,
            identity: identity.token.clone(),
            state: WorkerState::Idle,
            current: None,
            consecutive_errors: 0,
            done: 0,
            restarts: 0,
            rate: 0.0,
        }
    }
}
