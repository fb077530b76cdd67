//! Typed configuration from a TOML file plus environment overrides.
//!
//! Loads once at startup and fails fast on invalid settings. Every field has
//! a default, so an empty or missing file yields a runnable configuration.

pub mod identities;

use crate::error::{Error, Result};
use crate::model::OutcomeKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub use identities::IdentityAssignment;

/// Prefixes used when the configured set is empty or unparseable.
pub const DEFAULT_PREFIXES: [&str; 5] = ["67", "96", "98", "63", "93"];

/// Domain-to-window ratio at or above which rejection sampling is used.
pub const REJECTION_MIN_RATIO: u64 = 10;

/// Smallest domain-to-window ratio any generator strategy accepts.
pub const MIN_DOMAIN_RATIO: u64 = 2;

/// Largest domain the permutation strategy will materialize.
pub const MAX_PERMUTATION_DOMAIN: u64 = 1 << 24;

/// Hard ceiling on concurrent workers.
pub const MAX_WORKERS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub otel_endpoint: Option<String>,
    pub generator: GeneratorConfig,
    pub pool: PoolConfig,
    pub identities: IdentityConfig,
    pub breaker: BreakerConfig,
    pub outcomes: OutcomeConfig,
    pub writer: WriterConfig,
    pub stats: StatsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            otel_endpoint: None,
            generator: GeneratorConfig::default(),
            pool: PoolConfig::default(),
            identities: IdentityConfig::default(),
            breaker: BreakerConfig::default(),
            outcomes: OutcomeConfig::default(),
            writer: WriterConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub prefixes: Vec<String>,
    /// Number of random digits after the prefix.
    pub suffix_width: u32,
    /// Recency window capacity W.
    pub window: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            prefixes: DEFAULT_PREFIXES.iter().map(|p| p.to_string()).collect(),
            suffix_width: 7,
            window: 250_000,
        }
    }
}

impl GeneratorConfig {
    /// Number of distinct identifiers the configuration can produce.
    pub fn domain_size(&self) -> u64 {
        (self.prefixes.len() as u64).saturating_mul(10u64.saturating_pow(self.suffix_width))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    /// Cap `workers` at the recommended count for this machine.
    pub auto_limit: bool,
    /// Pause between two items on one worker.
    pub item_delay_ms: u64,
    /// Upper bound on session acquisition, including manual login.
    pub acquire_timeout_secs: u64,
    /// Upper bound on a single probe.
    pub submit_timeout_secs: u64,
    /// How long `stop()` waits for the workers before warning about the
    /// stragglers. Workers are always joined, never aborted.
    pub stop_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            auto_limit: true,
            item_delay_ms: 250,
            acquire_timeout_secs: 600,
            submit_timeout_secs: 30,
            stop_timeout_secs: 12,
        }
    }
}

impl PoolConfig {
    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Worker count actually spawned, after auto-limit and the hard clamp.
    pub fn effective_workers(&self) -> usize {
        let mut n = self.workers.max(1);
        if self.auto_limit {
            n = n.min(recommended_workers());
        }
        n.clamp(1, MAX_WORKERS)
    }
}

/// Two workers per CPU, between 2 and 16.
pub fn recommended_workers() -> usize {
    (num_cpus::get() * 2).clamp(2, 16)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// First profile number for sequential assignment.
    pub base: u32,
    /// Directory holding sequential profile directories.
    pub root: PathBuf,
    /// Explicit identity tokens; when non-empty, overrides sequential.
    pub explicit: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base: 1,
            root: PathBuf::from("profiles"),
            explicit: Vec::new(),
        }
    }
}

impl IdentityConfig {
    pub fn assignment(&self) -> IdentityAssignment {
        if self.explicit.is_empty() {
            IdentityAssignment::Sequential {
                base: self.base.max(1),
                root: self.root.clone(),
            }
        } else {
            IdentityAssignment::Explicit(self.explicit.clone())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures T that trip a session restart.
    pub failure_threshold: u32,
    /// Cooldown C between releasing and reacquiring a session.
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 12,
            cooldown_ms: 2_000,
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeConfig {
    /// When false, deferred outcomes are recorded as skipped.
    pub deferred_enabled: bool,
    /// Categories written to durable storage.
    pub persist: Vec<OutcomeKind>,
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self {
            deferred_enabled: true,
            persist: vec![OutcomeKind::Success, OutcomeKind::DeferredRetryLater],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Directory the category files live in.
    pub dir: PathBuf,
    /// Flush a category once this many items are buffered.
    pub flush_count: usize,
    /// Flush a category at least this often while it has items.
    pub flush_interval_ms: u64,
    pub shutdown_timeout_secs: u64,
    /// File name per category name; missing categories use `<category>.txt`.
    pub files: BTreeMap<String, String>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        let mut files = BTreeMap::new();
        files.insert(OutcomeKind::Success.to_string(), "valid.txt".to_string());
        files.insert(
            OutcomeKind::DeferredRetryLater.to_string(),
            "regsoon.txt".to_string(),
        );
        Self {
            dir: PathBuf::from("."),
            flush_count: 250,
            flush_interval_ms: 2_000,
            shutdown_timeout_secs: 6,
            files,
        }
    }
}

impl WriterConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Output path of one category.
    pub fn path_for(&self, kind: OutcomeKind) -> PathBuf {
        match self.files.get(kind.as_str()) {
            Some(name) => self.dir.join(name),
            None => self.dir.join(format!("{kind}.txt")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub sample_interval_ms: u64,
    /// Rolling window the rate is smoothed over.
    pub rate_window_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1_000,
            rate_window_ms: 5_000,
        }
    }
}

impl StatsConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration: file (if given and present), then environment
    /// overrides, then validation. A missing file silently yields defaults;
    /// callers report it once logging is up.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            _ => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without env overrides or validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.generator.prefixes = normalize_prefixes(&config.generator.prefixes.join(","));
        Ok(config)
    }

    /// Write the configuration back as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        info!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Apply `PROBEPOOL_*`, `LOG_LEVEL` and `OTEL_ENDPOINT` overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(raw) = env_var("PROBEPOOL_PREFIXES") {
            self.generator.prefixes = normalize_prefixes(&raw);
        }
        if let Some(raw) = env_var("PROBEPOOL_WINDOW") {
            self.generator.window = parse_var("PROBEPOOL_WINDOW", &raw)?;
        }
        if let Some(raw) = env_var("PROBEPOOL_WORKERS") {
            self.pool.workers = parse_var("PROBEPOOL_WORKERS", &raw)?;
        }
        if let Some(raw) = env_var("PROBEPOOL_OUTPUT_DIR") {
            self.writer.dir = PathBuf::from(raw);
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(endpoint) = env_var("OTEL_ENDPOINT") {
            self.otel_endpoint = Some(endpoint);
        }
        Ok(())
    }

    /// Reject configurations that cannot run correctly.
    pub fn validate(&self) -> Result<()> {
        let generator = &self.generator;
        if generator.prefixes.is_empty() {
            return Err(Error::Config("at least one prefix is required".to_string()));
        }
        if let Some(bad) = generator
            .prefixes
            .iter()
            .find(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(Error::Config(format!("prefix {bad:?} must be digits only")));
        }
        if let Some(dup) = duplicate_prefix(&generator.prefixes) {
            return Err(Error::Config(format!("prefix {dup:?} is listed more than once")));
        }
        if !(1..=9).contains(&generator.suffix_width) {
            return Err(Error::Config(format!(
                "suffix_width must be between 1 and 9, got {}",
                generator.suffix_width
            )));
        }
        if generator.window == 0 {
            return Err(Error::Config("generator window must be at least 1".to_string()));
        }
        let domain = generator.domain_size();
        let window = generator.window as u64;
        if domain < window.saturating_mul(MIN_DOMAIN_RATIO) {
            return Err(Error::Config(format!(
                "identifier domain {domain} is too small for window {window}: \
                 need at least {MIN_DOMAIN_RATIO}x the window"
            )));
        }
        if domain < window.saturating_mul(REJECTION_MIN_RATIO) && domain > MAX_PERMUTATION_DOMAIN {
            return Err(Error::Config(format!(
                "identifier domain {domain} is under {REJECTION_MIN_RATIO}x window {window} \
                 and too large to permute; shrink the window"
            )));
        }

        if self.pool.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.pool.submit_timeout_secs == 0 || self.pool.acquire_timeout_secs == 0 {
            return Err(Error::Config("acquire and submit timeouts must be non-zero".to_string()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(Error::Config("failure_threshold must be at least 1".to_string()));
        }
        if self.writer.flush_count == 0 {
            return Err(Error::Config("flush_count must be at least 1".to_string()));
        }
        if self.writer.flush_interval_ms == 0 {
            return Err(Error::Config("flush_interval_ms must be non-zero".to_string()));
        }
        if self.stats.sample_interval_ms == 0 {
            return Err(Error::Config("sample_interval_ms must be non-zero".to_string()));
        }
        if self.stats.rate_window_ms < 1_000 {
            return Err(Error::Config("rate_window_ms must be at least 1000".to_string()));
        }

        let explicit = &self.identities.explicit;
        if !explicit.is_empty() {
            let distinct: HashSet<&String> = explicit.iter().collect();
            if distinct.len() != explicit.len() {
                return Err(Error::Config("explicit identities must be distinct".to_string()));
            }
            let needed = self.pool.effective_workers();
            if explicit.len() < needed {
                return Err(Error::Config(format!(
                    "{needed} workers need {needed} identities, only {} configured",
                    explicit.len()
                )));
            }
        }

        let mut seen_files = HashSet::new();
        for kind in &self.outcomes.persist {
            if !seen_files.insert(self.writer.path_for(*kind)) {
                return Err(Error::Config(format!(
                    "category {kind} shares its output file with another category"
                )));
            }
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("environment variable {name} has invalid value {raw:?}")))
}

// ---------------------------------------------------------------------------
// Prefixes
// ---------------------------------------------------------------------------

/// Parse a free-form prefix list such as `"67, 96; 98 | 63/93"`.
///
/// Non-digits are stripped from each token. All prefixes take the length of
/// the first valid one; tokens of a different length and duplicates are
/// dropped. Returns an empty list when nothing usable remains.
pub fn parse_prefixes(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    let mut width = None;

    for token in raw.split(|c: char| c.is_whitespace() || ",;|/".contains(c)) {
        let digits: String = token.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }
        let expected = *width.get_or_insert(digits.len());
        if digits.len() != expected {
            continue;
        }
        if seen.insert(digits.clone()) {
            out.push(digits);
        }
    }
    out
}

/// [`parse_prefixes`] with the default set as fallback.
pub fn normalize_prefixes(raw: &str) -> Vec<String> {
    let parsed = parse_prefixes(raw);
    if parsed.is_empty() {
        DEFAULT_PREFIXES.iter().map(|p| p.to_string()).collect()
    } else {
        parsed
    }
}

/// First prefix that appears more than once. Two copies of one prefix would
/// render distinct codes to the same identifier.
pub fn duplicate_prefix(prefixes: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    prefixes
        .iter()
        .find(|p| !seen.insert(p.as_str()))
        .map(String::as_str)
}
