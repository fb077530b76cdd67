//! Background checkpoint writer.
//!
//! Workers push `(category, item)` entries into an unbounded queue and move
//! on. One task drains the queue into per-category buffers and appends each
//! buffer to its category file when it reaches `flush_count` items or when
//! `flush_interval` has passed since that category's last flush attempt.
//!
//! A buffer is cleared only after its lines are durably written. Failed
//! flushes keep the buffer and retry on the next trigger; they are never
//! reported to workers. Shutdown drains the queue and flushes everything.

use crate::config::WriterConfig;
use crate::error::Result;
use crate::model::{OutcomeKind, WorkItem};
use crate::telemetry::metrics::ProbeMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Attempts made by the final flush before giving up on a category.
const FINAL_FLUSH_ATTEMPTS: u32 = 3;
const FINAL_FLUSH_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Entry {
    kind: OutcomeKind,
    item: WorkItem,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    written: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
}

/// Writer throughput and health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    pub enqueued: u64,
    pub written: u64,
    /// Enqueued but not yet durably written.
    pub pending: u64,
    /// Failed flush attempts.
    pub failures: u64,
    /// Items abandoned after the final flush kept failing.
    pub dropped: u64,
}

/// Cheap, cloneable producer side of the writer queue.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<Entry>,
    counters: Arc<Counters>,
}

impl WriterHandle {
    /// Queue one item for its category file. Never blocks.
    pub fn enqueue(&self, kind: OutcomeKind, item: WorkItem) {
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(Entry { kind, item }).is_err() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(category = %kind, "writer already stopped, item dropped");
        }
    }
}

/// Owns the writer task.
pub struct ResultWriter {
    handle: WriterHandle,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
}

impl ResultWriter {
    /// Create the output files and start the writer task.
    pub fn spawn(config: WriterConfig, metrics: ProbeMetrics) -> Result<Self> {
        std::fs::create_dir_all(&config.dir)?;
        let mut paths = BTreeMap::new();
        for kind in OutcomeKind::ALL {
            paths.insert(kind, config.path_for(kind));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let shutdown = CancellationToken::new();

        let task = WriterTask {
            rx,
            paths,
            buffers: BTreeMap::new(),
            flush_count: config.flush_count.max(1),
            flush_interval: config.flush_interval(),
            counters: Arc::clone(&counters),
            metrics,
            shutdown: shutdown.clone(),
        };
        let join = tokio::spawn(task.run());

        info!(dir = %config.dir.display(), flush_count = config.flush_count, "writer started");
        Ok(Self {
            handle: WriterHandle { tx, counters },
            task: Mutex::new(Some(join)),
            shutdown,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Make sure the files of `kinds` exist so readers can open them early.
    pub fn touch(config: &WriterConfig, kinds: &[OutcomeKind]) -> Result<()> {
        std::fs::create_dir_all(&config.dir)?;
        for kind in kinds {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(config.path_for(*kind))?;
        }
        Ok(())
    }

    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    pub fn enqueue(&self, kind: OutcomeKind, item: WorkItem) {
        self.handle.enqueue(kind, item);
    }

    pub fn stats(&self) -> WriterStats {
        let c = &self.handle.counters;
        let enqueued = c.enqueued.load(Ordering::Relaxed);
        let written = c.written.load(Ordering::Relaxed);
        let dropped = c.dropped.load(Ordering::Relaxed);
        WriterStats {
            enqueued,
            written,
            pending: enqueued.saturating_sub(written + dropped),
            failures: c.failures.load(Ordering::Relaxed),
            dropped,
        }
    }

    /// Drain, flush everything, and stop the task. Safe to call repeatedly;
    /// only the first call does work.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut task) = task else {
            return;
        };
        match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(())) => {
                let stats = self.stats();
                info!(written = stats.written, dropped = stats.dropped, "writer stopped");
            }
            Ok(Err(e)) => error!("writer task failed: {e}"),
            Err(_) => {
                task.abort();
                error!(timeout = ?self.shutdown_timeout, "writer did not stop in time, aborted");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

struct CategoryBuffer {
    items: Vec<WorkItem>,
    last_flush: Instant,
}

struct WriterTask {
    rx: mpsc::UnboundedReceiver<Entry>,
    paths: BTreeMap<OutcomeKind, PathBuf>,
    buffers: BTreeMap<OutcomeKind, CategoryBuffer>,
    flush_count: usize,
    flush_interval: Duration,
    counters: Arc<Counters>,
    metrics: ProbeMetrics,
    shutdown: CancellationToken,
}

impl WriterTask {
    async fn run(mut self) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                entry = self.rx.recv() => match entry {
                    Some(entry) => {
                        let kind = entry.kind;
                        if self.push(entry) >= self.flush_count {
                            self.flush(kind).await;
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {}
            }
            self.flush_due().await;
        }

        self.rx.close();
        while let Ok(entry) = self.rx.try_recv() {
            self.push(entry);
        }
        self.final_flush().await;
        debug!("writer task finished");
    }

    /// Buffer an entry; returns the category's buffered count.
    fn push(&mut self, entry: Entry) -> usize {
        let buffer = self.buffers.entry(entry.kind).or_insert_with(|| CategoryBuffer {
            items: Vec::new(),
            last_flush: Instant::now(),
        });
        buffer.items.push(entry.item);
        buffer.items.len()
    }

    /// Earliest time a non-empty buffer becomes due. Idle writers wake once
    /// per interval.
    fn next_deadline(&self) -> Instant {
        self.buffers
            .values()
            .filter(|b| !b.items.is_empty())
            .map(|b| b.last_flush + self.flush_interval)
            .min()
            .unwrap_or_else(|| Instant::now() + self.flush_interval)
    }

    async fn flush_due(&mut self) {
        let now = Instant::now();
        let due: Vec<OutcomeKind> = self
            .buffers
            .iter()
            .filter(|(_, b)| !b.items.is_empty() && now >= b.last_flush + self.flush_interval)
            .map(|(kind, _)| *kind)
            .collect();
        for kind in due {
            self.flush(kind).await;
        }
    }

    /// Append one category's buffer to its file. Returns whether the buffer
    /// is now empty.
    async fn flush(&mut self, kind: OutcomeKind) -> bool {
        let Some(buffer) = self.buffers.get_mut(&kind) else {
            return true;
        };
        buffer.last_flush = Instant::now();
        if buffer.items.is_empty() {
            return true;
        }

        let count = buffer.items.len();
        let payload = render_lines(&buffer.items);
        let path = self.paths[&kind].clone();

        let result = tokio::task::spawn_blocking(move || append_lines(&path, payload.as_bytes()))
            .await
            .map_err(std::io::Error::other)
            .and_then(|r| r);

        match result {
            Ok(()) => {
                buffer.items.clear();
                self.counters.written.fetch_add(count as u64, Ordering::Relaxed);
                self.metrics.record_flush(kind, count, true);
                debug!(category = %kind, lines = count, "checkpoint flushed");
                true
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_flush(kind, count, false);
                warn!(
                    category = %kind,
                    pending = count,
                    path = %self.paths[&kind].display(),
                    "checkpoint flush failed, will retry: {e}"
                );
                false
            }
        }
    }

    async fn final_flush(&mut self) {
        let kinds: Vec<OutcomeKind> = self.buffers.keys().copied().collect();
        for kind in kinds {
            let mut flushed = false;
            for attempt in 1..=FINAL_FLUSH_ATTEMPTS {
                if self.flush(kind).await {
                    flushed = true;
                    break;
                }
                if attempt < FINAL_FLUSH_ATTEMPTS {
                    tokio::time::sleep(FINAL_FLUSH_BACKOFF).await;
                }
            }
            if !flushed {
                let lost = self.buffers.get(&kind).map_or(0, |b| b.items.len());
                self.counters.dropped.fetch_add(lost as u64, Ordering::Relaxed);
                error!(category = %kind, lost, "final checkpoint flush failed");
            }
        }
    }
}

fn render_lines(items: &[WorkItem]) -> String {
    let mut out = String::with_capacity(items.iter().map(|i| i.as_str().len() + 1).sum());
    for item in items {
        out.push_str(item.as_str());
        out.push('\n');
    }
    out
}

/// Append whole lines with a single write, then sync to disk.
fn append_lines(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(payload)?;
    file.sync_data()
}
