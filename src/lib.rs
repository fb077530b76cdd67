//! # probepool
//!
//! Concurrent probe pool: a set of workers, each holding one long-lived
//! interactive session, draws unique identifiers from a shared generator,
//! probes them through a pluggable session driver, and checkpoints the
//! interesting outcomes to append-only files.
//!
//! Provides the recency-window generator, the session driver contract, the
//! background result writer, run statistics, the per-worker circuit breaker
//! and the pool controller, plus tracing/OpenTelemetry setup.

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod generator;
pub mod model;
pub mod stats;
pub mod telemetry;
pub mod writer;
