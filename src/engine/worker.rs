//! Probe worker: one session, one loop.
//!
//! `Idle → WaitingAuth → Running ⇄ Paused → Closed`, with
//! `Running → Restarting → Running` when the circuit breaker trips. The
//! session is released exactly once on every exit path.

use super::breaker::CircuitBreaker;
use super::policy::OutcomePolicy;
use super::sleep_or_cancel;
use crate::driver::{DriverError, SessionDriver};
use crate::generator::Generator;
use crate::model::{Identity, Outcome, OutcomeKind, WorkerState, WorkerStatus};
use crate::stats::{Counter, RateWindow, Stats};
use crate::telemetry::metrics::ProbeMetrics;
use crate::telemetry::probe::record_state_transition;
use crate::writer::WriterHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, error, info, warn};

/// Timing and threshold knobs for one worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub item_delay: Duration,
    pub acquire_timeout: Duration,
    pub submit_timeout: Duration,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub rate_window: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            item_delay: config.pool.item_delay(),
            acquire_timeout: config.pool.acquire_timeout(),
            submit_timeout: config.pool.submit_timeout(),
            failure_threshold: config.breaker.failure_threshold,
            cooldown: config.breaker.cooldown(),
            rate_window: config.stats.rate_window(),
        }
    }
}

/// Everything a worker shares with the rest of the pool.
pub struct WorkerContext<D: SessionDriver> {
    pub driver: Arc<D>,
    pub generator: Arc<Generator>,
    pub stats: Arc<Stats>,
    pub writer: WriterHandle,
    pub policy: Arc<dyn OutcomePolicy>,
    pub metrics: ProbeMetrics,
    pub settings: WorkerSettings,
    pub cancel: CancellationToken,
    pub pause: watch::Receiver<bool>,
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Cancelled,
    /// Session could not be (re)acquired.
    Fatal,
}

pub struct ProbeWorker<D: SessionDriver> {
    identity: Identity,
    ctx: WorkerContext<D>,
    state: WorkerState,
    breaker: CircuitBreaker,
    status: watch::Sender<WorkerStatus>,
    rate: RateWindow,
    done: u64,
    span: Span,
}

impl<D: SessionDriver> ProbeWorker<D> {
    pub fn new(identity: Identity, ctx: WorkerContext<D>, span: Span) -> Self {
        let (status, _) = watch::channel(WorkerStatus::new(&identity));
        Self {
            breaker: CircuitBreaker::new(ctx.settings.failure_threshold),
            rate: RateWindow::new(ctx.settings.rate_window),
            identity,
            ctx,
            state: WorkerState::Idle,
            status,
            done: 0,
            span,
        }
    }

    /// Subscribe to this worker's status updates.
    pub fn status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.subscribe()
    }

    /// Run until cancelled or the session is lost for good.
    pub async fn run(mut self) {
        self.transition(WorkerState::WaitingAuth);
        info!(identity = %self.identity, "waiting for session (login may be required)");

        let mut session = self.acquire().await;
        let exit = if session.is_some() {
            self.transition(WorkerState::Running);
            self.probe_loop(&mut session).await
        } else {
            Exit::Fatal
        };

        if let Some(session) = session.take() {
            self.ctx.driver.release(session).await;
        }
        match exit {
            Exit::Cancelled => info!(done = self.done, "worker stopped"),
            Exit::Fatal => error!(done = self.done, "worker closed: no usable session"),
        }
        self.status.send_modify(|s| {
            s.current = None;
            s.rate = 0.0;
        });
        self.transition(WorkerState::Closed);
    }

    async fn probe_loop(&mut self, session: &mut Option<D::Session>) -> Exit {
        loop {
            if self.ctx.cancel.is_cancelled() {
                return Exit::Cancelled;
            }

            let paused = *self.ctx.pause.borrow();
            if paused {
                self.transition(WorkerState::Paused);
                if !self.wait_resumed().await {
                    return Exit::Cancelled;
                }
                self.transition(WorkerState::Running);
                continue;
            }

            let Some(live) = session.as_mut() else {
                return Exit::Fatal;
            };

            let item = self.ctx.generator.next();
            self.ctx.stats.increment(Counter::Attempts);
            self.status.send_modify(|s| s.current = Some(item.clone()));

            let started = Instant::now();
            let submit = self.ctx.driver.submit(live, &item, &self.ctx.cancel);
            let outcome = match tokio::time::timeout(self.ctx.settings.submit_timeout, submit).await
            {
                Ok(outcome) => outcome,
                Err(_) => Outcome::error(
                    item.clone(),
                    format!("probe timed out after {:?}", self.ctx.settings.submit_timeout),
                ),
            };
            let outcome = self.ctx.policy.classify(outcome);
            let kind = outcome.kind;

            self.ctx.stats.record_outcome(kind);
            self.ctx
                .metrics
                .record_outcome(kind, started.elapsed().as_secs_f64() * 1_000.0);
            if self.ctx.policy.persists(kind) {
                self.ctx.writer.enqueue(kind, outcome.item.clone());
            }
            self.done += 1;
            let rate = self.rate.observe(Instant::now(), self.done);

            if kind.is_failure() {
                warn!(
                    item = %outcome.item,
                    consecutive_errors = self.breaker.consecutive_failures() + 1,
                    detail = outcome.detail.as_deref().unwrap_or("-"),
                    "probe failed"
                );
                if self.breaker.record_failure() {
                    if self.ctx.cancel.is_cancelled() {
                        return Exit::Cancelled;
                    }
                    if let Some(exit) = self.restart(session).await {
                        return exit;
                    }
                }
            } else {
                self.breaker.record_success();
                if kind != OutcomeKind::Skipped {
                    info!(item = %outcome.item, outcome = %kind, "probe classified");
                } else {
                    debug!(item = %outcome.item, outcome = %kind, "probe classified");
                }
            }

            let consecutive = self.breaker.consecutive_failures();
            let done = self.done;
            self.status.send_modify(|s| {
                s.current = None;
                s.consecutive_errors = consecutive;
                s.done = done;
                s.rate = rate;
            });

            if !self.ctx.settings.item_delay.is_zero()
                && !sleep_or_cancel(self.ctx.settings.item_delay, &self.ctx.cancel).await
            {
                return Exit::Cancelled;
            }
        }
    }

    /// Release the wedged session, cool down, reacquire. Returns an exit
    /// reason if the worker cannot continue.
    async fn restart(&mut self, session: &mut Option<D::Session>) -> Option<Exit> {
        warn!(
            consecutive_errors = self.breaker.consecutive_failures(),
            cooldown = ?self.ctx.settings.cooldown,
            "circuit open, restarting session"
        );
        self.transition(WorkerState::Restarting);
        self.ctx.stats.increment(Counter::Restarts);
        self.ctx.metrics.record_restart(self.identity.worker);
        let trips = self.breaker.trips();
        self.status.send_modify(|s| s.restarts = trips);

        if let Some(old) = session.take() {
            self.ctx.driver.release(old).await;
        }
        if !sleep_or_cancel(self.ctx.settings.cooldown, &self.ctx.cancel).await {
            return Some(Exit::Cancelled);
        }

        match self.acquire().await {
            Some(fresh) => {
                *session = Some(fresh);
                self.breaker.close();
                self.transition(WorkerState::Running);
                info!("session restarted");
                None
            }
            None if self.ctx.cancel.is_cancelled() => Some(Exit::Cancelled),
            None => Some(Exit::Fatal),
        }
    }

    /// Acquire a session within the acquire timeout. `None` on failure,
    /// timeout, or cancellation; failures are logged here.
    async fn acquire(&self) -> Option<D::Session> {
        let timeout = self.ctx.settings.acquire_timeout;
        let acquire = self.ctx.driver.acquire(&self.identity, &self.ctx.cancel);
        match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(session)) => {
                info!("session ready");
                Some(session)
            }
            Ok(Err(DriverError::Cancelled)) => {
                debug!("session acquisition cancelled");
                None
            }
            Ok(Err(e)) => {
                error!("session acquisition failed: {e}");
                None
            }
            Err(_) => {
                error!("session acquisition failed: {}", DriverError::TimedOut(timeout));
                None
            }
        }
    }

    /// Block until resumed. False if cancelled first.
    async fn wait_resumed(&mut self) -> bool {
        let cancel = self.ctx.cancel.clone();
        loop {
            let paused = *self.ctx.pause.borrow_and_update();
            if !paused {
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = self.ctx.pause.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    fn transition(&mut self, to: WorkerState) {
        let from = self.state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(from = %from, to = %to, "unexpected worker state transition");
        }
        self.state = to;
        record_state_transition(&self.span, from, to);
        self.status.send_modify(|s| s.state = to);
    }
}
