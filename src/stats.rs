//! Thread-safe run counters and rolling-window rates.
//!
//! Workers bump per-counter atomics; nothing else happens under them. A
//! sampler task periodically turns the counters into a smoothed rate and
//! publishes a read-only [`StatsReport`] through a watch channel.

use crate::model::OutcomeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Named monotonic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Attempts,
    Successes,
    Deferred,
    Skipped,
    AlreadyDone,
    Errors,
    DoneTotal,
    Restarts,
}

impl Counter {
    const COUNT: usize = 8;

    fn index(self) -> usize {
        self as usize
    }

    /// The counter an outcome increments (besides attempts and done).
    pub fn for_outcome(kind: OutcomeKind) -> Counter {
        match kind {
            OutcomeKind::Success => Counter::Successes,
            OutcomeKind::DeferredRetryLater => Counter::Deferred,
            OutcomeKind::Skipped => Counter::Skipped,
            OutcomeKind::AlreadyDone => Counter::AlreadyDone,
            OutcomeKind::Error => Counter::Errors,
        }
    }
}

/// Shared counter block. One atomic per counter.
#[derive(Debug, Default)]
pub struct Stats {
    counters: [AtomicU64; Counter::COUNT],
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, delta: u64) {
        self.counters[counter.index()].fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Count one finished probe: its category plus the done total.
    pub fn record_outcome(&self, kind: OutcomeKind) {
        self.increment(Counter::for_outcome(kind));
        self.increment(Counter::DoneTotal);
    }

    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempts: self.get(Counter::Attempts),
            successes: self.get(Counter::Successes),
            deferred: self.get(Counter::Deferred),
            skipped: self.get(Counter::Skipped),
            already_done: self.get(Counter::AlreadyDone),
            errors: self.get(Counter::Errors),
            done_total: self.get(Counter::DoneTotal),
            restarts: self.get(Counter::Restarts),
        }
    }
}

/// Plain copy of every counter at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub deferred: u64,
    pub skipped: u64,
    pub already_done: u64,
    pub errors: u64,
    pub done_total: u64,
    pub restarts: u64,
}

// ---------------------------------------------------------------------------
// Rates
// ---------------------------------------------------------------------------

/// Rolling window of `(instant, total)` samples. The rate is the slope
/// between the oldest and newest sample still inside the window.
#[derive(Debug)]
pub struct RateWindow {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_secs(1)),
            samples: VecDeque::new(),
        }
    }

    /// Add a sample and return the current rate in units per second.
    pub fn observe(&mut self, at: Instant, total: u64) -> f64 {
        self.samples.push_back((at, total));
        while let Some(&(oldest, _)) = self.samples.front() {
            if at.duration_since(oldest) > self.window && self.samples.len() > 2 {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        self.rate()
    }

    pub fn rate(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(&(t0, c0)), Some(&(t1, c1))) => {
                let dt = t1.duration_since(t0).as_secs_f64();
                if dt <= 0.0 {
                    0.0
                } else {
                    c1.saturating_sub(c0) as f64 / dt
                }
            }
            _ => 0.0,
        }
    }
}

/// Published by the sampler on every tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsReport {
    pub counters: StatsSnapshot,
    /// Completed probes per second, smoothed over the rate window.
    pub rate: f64,
    pub elapsed_secs: f64,
    pub sampled_at: Option<DateTime<Utc>>,
}

/// Spawn the periodic sampler. It stops when `cancel` fires, publishing one
/// last report first.
pub fn spawn_sampler(
    stats: Arc<Stats>,
    interval: Duration,
    window: Duration,
    cancel: CancellationToken,
) -> (JoinHandle<()>, watch::Receiver<StatsReport>) {
    let (tx, rx) = watch::channel(StatsReport::default());
    let handle = tokio::spawn(async move {
        let started = Instant::now();
        let mut rates = RateWindow::new(window);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let stopping = tokio::select! {
                _ = cancel.cancelled() => true,
                _ = ticker.tick() => false,
            };
            let now = Instant::now();
            let counters = stats.snapshot();
            let rate = rates.observe(now, counters.done_total);
            tx.send_replace(StatsReport {
                counters,
                rate,
                elapsed_secs: now.duration_since(started).as_secs_f64(),
                sampled_at: Some(Utc::now()),
            });
            if stopping {
                break;
            }
        }
        debug!("stats sampler stopped");
    });
    (handle, rx)
}
