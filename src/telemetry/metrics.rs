//! Metric instruments for probepool.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op, so recording is
//! always safe. Instruments are built once per pool and cloned into tasks.

use crate::model::OutcomeKind;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for probepool instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("probepool")
}

#[derive(Clone)]
pub struct ProbeMetrics {
    outcomes: Counter<u64>,
    restarts: Counter<u64>,
    flushes: Counter<u64>,
    flushed_lines: Counter<u64>,
    probe_duration_ms: Histogram<f64>,
}

impl ProbeMetrics {
    pub fn new() -> Self {
        let meter = meter();
        Self {
            // Labels: `category`.
            outcomes: meter
                .u64_counter("probepool.probe.outcomes")
                .with_description("Classified probe outcomes")
                .build(),
            // Labels: `worker`.
            restarts: meter
                .u64_counter("probepool.session.restarts")
                .with_description("Sessions restarted by the circuit breaker")
                .build(),
            // Labels: `category`, `result` ("ok" | "error").
            flushes: meter
                .u64_counter("probepool.checkpoint.flushes")
                .with_description("Checkpoint flush attempts")
                .build(),
            // Labels: `category`.
            flushed_lines: meter
                .u64_counter("probepool.checkpoint.lines")
                .with_description("Work items durably written")
                .build(),
            // Labels: `category`.
            probe_duration_ms: meter
                .f64_histogram("probepool.probe.duration_ms")
                .with_description("Probe duration in milliseconds")
                .with_unit("ms")
                .build(),
        }
    }

    pub fn record_outcome(&self, kind: OutcomeKind, duration_ms: f64) {
        let labels = [KeyValue::new("category", kind.as_str())];
        self.outcomes.add(1, &labels);
        self.probe_duration_ms.record(duration_ms, &labels);
    }

    pub fn record_restart(&self, worker: usize) {
        self.restarts.add(1, &[KeyValue::new("worker", worker as i64)]);
    }

    pub fn record_flush(&self, kind: OutcomeKind, lines: usize, ok: bool) {
        self.flushes.add(
            1,
            &[
                KeyValue::new("category", kind.as_str()),
                KeyValue::new("result", if ok { "ok" } else { "error" }),
            ],
        );
        if ok {
            self.flushed_lines
                .add(lines as u64, &[KeyValue::new("category", kind.as_str())]);
        }
    }
}

impl Default for ProbeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
