//! Pool controller: starts workers, toggles pause, stops and drains.

use super::policy::{ConfiguredPolicy, OutcomePolicy};
use super::worker::{ProbeWorker, WorkerContext, WorkerSettings};
use crate::config::{Config, IdentityAssignment};
use crate::driver::SessionDriver;
use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::model::{OutcomeKind, WorkerStatus};
use crate::stats::{Stats, StatsReport, StatsSnapshot, spawn_sampler};
use crate::telemetry::metrics::ProbeMetrics;
use crate::telemetry::probe::worker_span;
use crate::writer::{ResultWriter, WriterStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

/// Read-only view of the pool, suitable for printing or serializing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub run_id: Option<Uuid>,
    pub running: bool,
    pub paused: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
    pub counters: StatsSnapshot,
    /// Smoothed completions per second from the last sampler tick.
    pub rate: f64,
    pub window_len: usize,
    pub window_capacity: usize,
    pub issued: u64,
    pub writer: WriterStats,
    pub workers: Vec<WorkerStatus>,
}

struct WorkerSlot {
    worker: usize,
    join: JoinHandle<()>,
}

/// Handles owned by the task that stops the run.
struct ActiveRun {
    id: Uuid,
    cancel: CancellationToken,
    workers: Vec<WorkerSlot>,
    writer: Arc<ResultWriter>,
    sampler: JoinHandle<()>,
    sampler_cancel: CancellationToken,
}

/// Observers of the current (or last) run. Outlives `stop()` so the final
/// numbers stay readable.
#[derive(Clone)]
struct RunView {
    id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    stopped_after: Option<f64>,
    statuses: Vec<watch::Receiver<WorkerStatus>>,
    writer: Arc<ResultWriter>,
    report: watch::Receiver<StatsReport>,
}

pub struct PoolController<D: SessionDriver> {
    driver: Arc<D>,
    config: Config,
    generator: Arc<Generator>,
    stats: Arc<Stats>,
    policy: Arc<dyn OutcomePolicy>,
    metrics: ProbeMetrics,
    pause: watch::Sender<bool>,
    running: AtomicBool,
    lifecycle: tokio::sync::Mutex<Option<ActiveRun>>,
    view: Mutex<Option<RunView>>,
}

impl<D: SessionDriver> PoolController<D> {
    /// Validate `config` and build the shared generator and counters.
    pub fn new(driver: Arc<D>, config: Config) -> Result<Self> {
        config.validate()?;
        let generator = Arc::new(Generator::new(&config.generator)?);
        let policy: Arc<dyn OutcomePolicy> = Arc::new(ConfiguredPolicy::new(&config.outcomes));
        let (pause, _) = watch::channel(false);
        Ok(Self {
            driver,
            generator,
            stats: Arc::new(Stats::new()),
            policy,
            metrics: ProbeMetrics::new(),
            pause,
            running: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(None),
            view: Mutex::new(None),
            config,
        })
    }

    /// Replace the outcome policy. Takes effect on the next `start()`.
    pub fn with_policy(mut self, policy: impl OutcomePolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Use a fixed generator seed. Takes effect immediately.
    pub fn with_seed(mut self, seed: u64) -> Result<Self> {
        self.generator = Arc::new(Generator::with_seed(&self.config.generator, seed)?);
        Ok(self)
    }

    /// Start with the configured worker count and identities.
    pub async fn start_configured(&self) -> Result<bool> {
        let workers = self.config.pool.effective_workers();
        if workers != self.config.pool.workers {
            info!(
                requested = self.config.pool.workers,
                effective = workers,
                "worker count limited"
            );
        }
        let assignment = self.config.identities.assignment();
        self.start(workers, &assignment).await
    }

    /// Start `worker_count` workers. Returns `Ok(false)` without doing
    /// anything if a run is already active.
    pub async fn start(&self, worker_count: usize, assignment: &IdentityAssignment) -> Result<bool> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            warn!("pool already running, start ignored");
            return Ok(false);
        }
        if worker_count == 0 {
            return Err(Error::Config("worker count must be at least 1".to_string()));
        }

        let identities = assignment.assign(worker_count)?;
        let mut seen = HashSet::new();
        if let Some(dup) = identities.iter().find(|i| !seen.insert(i.token.as_str())) {
            return Err(Error::Config(format!("identity {dup} assigned to more than one worker")));
        }

        let persisted: Vec<OutcomeKind> = OutcomeKind::ALL
            .into_iter()
            .filter(|k| self.policy.persists(*k))
            .collect();
        ResultWriter::touch(&self.config.writer, &persisted)?;
        let writer = Arc::new(ResultWriter::spawn(
            self.config.writer.clone(),
            self.metrics.clone(),
        )?);

        self.stats.reset();
        self.generator.reset();
        self.pause.send_replace(false);

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let sampler_cancel = CancellationToken::new();
        let (sampler, report) = spawn_sampler(
            Arc::clone(&self.stats),
            self.config.stats.sample_interval(),
            self.config.stats.rate_window(),
            sampler_cancel.clone(),
        );

        let settings = WorkerSettings::from_config(&self.config);
        let mut workers = Vec::with_capacity(identities.len());
        let mut statuses = Vec::with_capacity(identities.len());
        for identity in identities {
            let worker_no = identity.worker;
            let span = worker_span(&identity);
            let ctx = WorkerContext {
                driver: Arc::clone(&self.driver),
                generator: Arc::clone(&self.generator),
                stats: Arc::clone(&self.stats),
                writer: writer.handle(),
                policy: Arc::clone(&self.policy),
                metrics: self.metrics.clone(),
                settings: settings.clone(),
                cancel: cancel.clone(),
                pause: self.pause.subscribe(),
            };
            let worker = ProbeWorker::new(identity, ctx, span.clone());
            statuses.push(worker.status());
            let join = tokio::spawn(worker.run().instrument(span));
            workers.push(WorkerSlot {
                worker: worker_no,
                join,
            });
        }

        info!(
            run_id = %id,
            workers = workers.len(),
            strategy = ?self.generator.strategy(),
            domain = self.generator.domain_size(),
            window = self.generator.capacity(),
            "pool started"
        );

        *self.view_lock() = Some(RunView {
            id,
            started_at: Utc::now(),
            started: Instant::now(),
            stopped_after: None,
            statuses,
            writer: Arc::clone(&writer),
            report,
        });
        *lifecycle = Some(ActiveRun {
            id,
            cancel,
            workers,
            writer,
            sampler,
            sampler_cancel,
        });
        self.running.store(true, Ordering::SeqCst);
        Ok(true)
    }

    /// Cancel every worker, wait for them to release their sessions, then
    /// drain the writer. Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(run) = lifecycle.take() else {
            return false;
        };
        info!(run_id = %run.id, "stopping pool");

        run.cancel.cancel();
        self.pause.send_replace(false);

        // Never abort: a dropped worker future skips its session release.
        let deadline = tokio::time::Instant::now() + self.config.pool.stop_timeout();
        for mut slot in run.workers {
            let joined = match tokio::time::timeout_at(deadline, &mut slot.join).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        worker = slot.worker,
                        timeout = ?self.config.pool.stop_timeout(),
                        "worker slow to stop, waiting for its session to be released"
                    );
                    (&mut slot.join).await
                }
            };
            if let Err(e) = joined {
                error!(worker = slot.worker, "worker task failed: {e}");
            }
        }

        run.writer.shutdown().await;
        run.sampler_cancel.cancel();
        if let Err(e) = run.sampler.await {
            warn!("stats sampler failed: {e}");
        }

        self.running.store(false, Ordering::SeqCst);
        if let Some(view) = self.view_lock().as_mut() {
            view.stopped_after = Some(view.started.elapsed().as_secs_f64());
        }
        let counters = self.stats.snapshot();
        info!(
            run_id = %run.id,
            done = counters.done_total,
            successes = counters.successes,
            deferred = counters.deferred,
            errors = counters.errors,
            restarts = counters.restarts,
            "pool stopped"
        );
        true
    }

    /// Ask every worker to hold after its current item. Sessions stay open.
    /// Returns false if not running or already paused.
    pub fn pause(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let changed = self.pause.send_if_modified(|paused| !std::mem::replace(paused, true));
        if changed {
            info!("pool paused");
        }
        changed
    }

    /// Returns false if not running or not paused.
    pub fn resume(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let changed = self.pause.send_if_modified(|paused| std::mem::replace(paused, false));
        if changed {
            info!("pool resumed");
        }
        changed
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    /// Latest status of every worker of the current (or last) run.
    pub fn workers(&self) -> Vec<WorkerStatus> {
        self.view_lock()
            .as_ref()
            .map(|v| v.statuses.iter().map(|rx| rx.borrow().clone()).collect())
            .unwrap_or_default()
    }

    /// Sampler reports of the current (or last) run.
    pub fn subscribe_stats(&self) -> Option<watch::Receiver<StatsReport>> {
        self.view_lock().as_ref().map(|v| v.report.clone())
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let view = self.view_lock().clone();
        let (run_id, started_at, elapsed_secs, rate, writer, workers) = match view {
            Some(v) => {
                let elapsed = v
                    .stopped_after
                    .unwrap_or_else(|| v.started.elapsed().as_secs_f64());
                let rate = if v.stopped_after.is_some() {
                    0.0
                } else {
                    v.report.borrow().rate
                };
                let workers = v.statuses.iter().map(|rx| rx.borrow().clone()).collect();
                (
                    Some(v.id),
                    Some(v.started_at),
                    elapsed,
                    rate,
                    v.writer.stats(),
                    workers,
                )
            }
            None => (None, None, 0.0, 0.0, WriterStats::default(), Vec::new()),
        };
        PoolSnapshot {
            run_id,
            running: self.is_running(),
            paused: self.is_paused(),
            started_at,
            elapsed_secs,
            counters: self.stats.snapshot(),
            rate,
            window_len: self.generator.window_len(),
            window_capacity: self.generator.capacity(),
            issued: self.generator.issued(),
            writer,
            workers,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn generator(&self) -> &Arc<Generator> {
        &self.generator
    }

    fn view_lock(&self) -> std::sync::MutexGuard<'_, Option<RunView>> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D: SessionDriver> Drop for PoolController<D> {
    fn drop(&mut self) {
        if let Some(run) = self.lifecycle.get_mut().as_ref() {
            warn!(run_id = %run.id, "pool dropped while running, cancelling workers");
            run.cancel.cancel();
            run.sampler_cancel.cancel();
        }
    }
}
