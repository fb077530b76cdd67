//! Per-worker circuit breaker.
//!
//! Closed while probes succeed. `threshold` consecutive failures open it; the
//! worker then releases its session, cools down, and reacquires. A successful
//! reacquire closes it again. There is no half-open state: the first regular
//! probe after the cooldown is the trial.

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: BreakerState,
    threshold: u32,
    consecutive: u32,
    opened_at: Option<Instant>,
    trips: u64,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            state: BreakerState::Closed,
            threshold: threshold.max(1),
            consecutive: 0,
            opened_at: None,
            trips: 0,
        }
    }

    /// Any non-failure outcome clears the streak.
    pub fn record_success(&mut self) {
        if self.state == BreakerState::Closed {
            self.consecutive = 0;
        }
    }

    /// Count a failure. Returns true when this failure opens the circuit.
    pub fn record_failure(&mut self) -> bool {
        if self.state == BreakerState::Open {
            return false;
        }
        self.consecutive += 1;
        if self.consecutive >= self.threshold {
            self.state = BreakerState::Open;
            self.opened_at = Some(Instant::now());
            self.trips += 1;
            true
        } else {
            false
        }
    }

    /// Session reacquired: back to normal with a clean streak.
    pub fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive = 0;
        self.opened_at = None;
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Times the circuit has opened.
    pub fn trips(&self) -> u64 {
        self.trips
    }
}
