//! probepool CLI: run a simulated pool and manage its configuration.

use clap::{Parser, Subcommand};
use probepool::config::{Config, MAX_WORKERS};
use probepool::driver::SimulatedDriver;
use probepool::engine::{PoolController, PoolSnapshot};
use probepool::telemetry::{TelemetryConfig, init_telemetry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_CONFIG: &str = "probepool.toml";

#[derive(Parser)]
#[command(name = "probepool", about = "Concurrent session-bound probe pool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pool against the simulated driver
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Override the configured worker count
        #[arg(long)]
        workers: Option<usize>,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
        /// Print snapshots as JSON
        #[arg(long)]
        json: bool,
    },
    /// Configuration file operations
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Per-worker identity directories
    Identities {
        #[command(subcommand)]
        action: IdentityAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default configuration
    Init {
        #[arg(default_value = DEFAULT_CONFIG)]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Load, validate and print the effective configuration
    Check {
        #[arg(default_value = DEFAULT_CONFIG)]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Create profile directories for the configured worker count
    Create {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Remove profile directories for the configured worker count
    Clear {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            workers,
            duration,
            json,
        } => cmd_run(&config, workers, duration, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init { path, force } => cmd_config_init(&path, force),
            ConfigAction::Check { path } => cmd_config_check(&path),
        },
        Command::Identities { action } => match action {
            IdentityAction::Create { config } => cmd_identities(&config, true),
            IdentityAction::Clear { config } => cmd_identities(&config, false),
        },
    }
}

async fn cmd_run(
    path: &Path,
    workers: Option<usize>,
    duration: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = Config::load(Some(path))?;
    if let Some(n) = workers {
        config.pool.workers = n.clamp(1, MAX_WORKERS);
    }

    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
    }

    let pool = Arc::new(PoolController::new(
        Arc::new(SimulatedDriver::default()),
        config,
    )?);
    pool.start_configured().await?;

    if let Some(mut reports) = pool.subscribe_stats() {
        tokio::spawn(async move {
            while reports.changed().await.is_ok() {
                let report = reports.borrow_and_update().clone();
                tracing::info!(
                    done = report.counters.done_total,
                    successes = report.counters.successes,
                    deferred = report.counters.deferred,
                    errors = report.counters.errors,
                    rate = report.rate,
                    "stats"
                );
            }
        });
    }

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(std::time::Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received");
                break;
            }
            _ = &mut deadline => {
                tracing::info!("duration elapsed");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "pause" => {
                        pool.pause();
                    }
                    "resume" => {
                        pool.resume();
                    }
                    "stats" => print_snapshot(&pool.snapshot(), json)?,
                    "stop" | "quit" => break,
                    "" => {}
                    other => eprintln!("unknown command: {other} (pause, resume, stats, stop)"),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("stdin closed: {e}");
                    stdin_open = false;
                }
            },
        }
    }

    pool.stop().await;
    print_snapshot(&pool.snapshot(), json)?;
    Ok(())
}

fn cmd_config_init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn cmd_config_check(path: &Path) -> anyhow::Result<()> {
    let config = Config::load(Some(path))?;
    let generator = probepool::generator::Generator::new(&config.generator)?;

    if path.exists() {
        println!("Config file:   {}", path.display());
    } else {
        println!("Config file:   {} (not found, using defaults)", path.display());
    }
    println!("Prefixes:      {}", config.generator.prefixes.join(", "));
    println!("Suffix width:  {}", config.generator.suffix_width);
    println!(
        "Domain:        {} ({:?}, window {})",
        generator.domain_size(),
        generator.strategy(),
        config.generator.window
    );
    println!(
        "Workers:       {} (requested {}, auto limit {})",
        config.pool.effective_workers(),
        config.pool.workers,
        config.pool.auto_limit
    );
    println!(
        "Breaker:       {} failures, {}ms cooldown",
        config.breaker.failure_threshold, config.breaker.cooldown_ms
    );
    println!(
        "Writer:        {} (every {} items or {}ms)",
        config.writer.dir.display(),
        config.writer.flush_count,
        config.writer.flush_interval_ms
    );
    for kind in &config.outcomes.persist {
        println!("  {:<12} -> {}", kind.as_str(), config.writer.path_for(*kind).display());
    }
    println!("OK");
    Ok(())
}

fn cmd_identities(path: &Path, create: bool) -> anyhow::Result<()> {
    let config = Config::load(Some(path))?;
    let assignment = config.identities.assignment();
    let count = config.pool.effective_workers();
    let dirs = if create {
        assignment.create_dirs(count)?
    } else {
        assignment.clear_dirs(count)?
    };
    if dirs.is_empty() {
        println!("Nothing to do.");
    }
    for dir in &dirs {
        println!("{} {}", if create { "created" } else { "removed" }, dir.display());
    }
    Ok(())
}

fn print_snapshot(snapshot: &PoolSnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    let c = &snapshot.counters;
    println!(
        "{}  elapsed {:.0}s  rate {:.2}/s",
        if snapshot.paused {
            "PAUSED"
        } else if snapshot.running {
            "RUNNING"
        } else {
            "STOPPED"
        },
        snapshot.elapsed_secs,
        snapshot.rate
    );
    println!(
        "done {}  success {}  deferred {}  skipped {}  already {}  errors {}  restarts {}",
        c.done_total, c.successes, c.deferred, c.skipped, c.already_done, c.errors, c.restarts
    );
    println!(
        "window {}/{}  issued {}  written {}  pending {}  flush failures {}",
        snapshot.window_len,
        snapshot.window_capacity,
        snapshot.issued,
        snapshot.writer.written,
        snapshot.writer.pending,
        snapshot.writer.failures
    );
    if !snapshot.workers.is_empty() {
        println!("{:<4}  {:<12}  {:<8}  {:<5}  {:<8}  IDENTITY", "W", "STATE", "DONE", "ERRS", "RATE");
        for w in &snapshot.workers {
            println!(
                "{:<4}  {:<12}  {:<8}  {:<5}  {:<8.2}  {}",
                w.worker,
                w.state.to_string(),
                w.done,
                w.consecutive_errors,
                w.rate,
                w.identity
            );
        }
    }
    Ok(())
}
