//! # botprobe-cli
//!
//! Binary entry point for botprobe.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration loading with environment overrides
//! - `botprobe run <scenario>`: run one built-in scenario and print its report
//! - `botprobe list`: the scenario catalog
//! - `botprobe store-stats`: connection check, document counts and indexes
//!   from the bot's store
//!
//! Exit status is 0 when the scenario passed, 1 when it failed or could not
//! run, and 130 when the operator interrupted it.

mod display;

use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use botprobe_e2e::{
    DocumentStore, HarnessConfig, Interrupt, MongoShellStore, RunError, RunReport, ScenarioRunner,
    StoreError, scenarios, summarize,
};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Exit status for a run aborted by SIGINT or SIGTERM.
const EXIT_INTERRUPTED: i32 = 130;

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    /// Returns true if colors should be used based on mode and terminal detection.
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// botprobe - black-box webhook probe harness for Telegram bots
#[derive(Parser, Debug)]
#[command(name = "botprobe", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, default_value = "botprobe.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a built-in scenario against the configured bot
    Run(RunArgs),

    /// List built-in scenarios
    List,

    /// Check the bot's store and show document counts and indexes
    StoreStats,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Scenario id (see `botprobe list`)
    scenario: String,

    /// Also write the report as JSON to this file
    #[arg(long, value_name = "FILE")]
    json: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so the report on stdout stays clean.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let use_colors = cli.color.should_use_colors();
    colored::control::set_override(use_colors);

    let exit_code = match cli.command {
        Commands::Run(args) => run_command(&cli.config, use_colors, args).await?,
        Commands::List => {
            display::print_catalog(&scenarios::all());
            0
        }
        Commands::StoreStats => store_stats_command(&cli.config).await?,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Loads the config file (or defaults when it does not exist), applies
/// environment overrides and validates the result.
fn load_config(path: &Path) -> Result<HarnessConfig> {
    let mut config = if path.exists() {
        HarnessConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        warn!("Config file {} not found, using defaults", path.display());
        HarnessConfig::default()
    };
    config.apply_env();

    let warnings = config.validate().context("Invalid configuration")?;
    for warning in warnings {
        warn!("{warning}");
    }
    Ok(config)
}

async fn run_command(config_path: &Path, use_colors: bool, args: RunArgs) -> Result<i32> {
    let config = load_config(config_path)?;

    let definition = scenarios::find(&args.scenario).with_context(|| {
        format!(
            "Unknown scenario '{}'. Run `botprobe list` to see available scenarios",
            args.scenario
        )
    })?;
    let scenario = definition.build(&config);

    let (interrupt_tx, interrupt) = Interrupt::channel();
    spawn_signal_handlers(&interrupt_tx);

    let runner = ScenarioRunner::from_config(&config)
        .context("Failed to set up scenario runner")?
        .with_interrupt(interrupt);
    debug!(?runner, "runner ready");

    let started = Instant::now();
    let run = match runner.run(&scenario).await {
        Ok(run) => run,
        Err(e @ RunError::Interrupted(_)) => {
            warn!(scenario = %scenario.id, "{e}");
            display::print_interrupted(&scenario.id, started.elapsed());
            return Ok(e.exit_code());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Scenario '{}' aborted", scenario.id));
        }
    };

    let report = summarize(&run, &config.thresholds);
    print!("{}", report.render(use_colors));

    if let Some(path) = &args.json {
        write_json(&report, path)?;
        info!(path = %path.display(), "report written");
    }

    // A signal that arrived after the last wait still marks the run interrupted.
    if *interrupt_tx.borrow() {
        return Ok(EXIT_INTERRUPTED);
    }
    Ok(report.exit_code())
}

fn write_json(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

async fn store_stats_command(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;

    let store = match MongoShellStore::from_config(&config.store) {
        Ok(store) => store,
        Err(StoreError::Disabled) => {
            anyhow::bail!("Document store is disabled (store.enabled: false)")
        }
        Err(e) => return Err(e).context("Failed to set up document store"),
    };

    let stats = collect_store_stats(&store, store.database(), &config.store.collections).await;
    display::print_store_stats(&stats);
    Ok(i32::from(stats.has_errors()))
}

/// Pings the store, then counts documents and lists indexes per collection.
/// Nothing else is queried when the ping fails.
async fn collect_store_stats(
    store: &dyn DocumentStore,
    database: &str,
    collections: &[String],
) -> display::StoreStats {
    let mut stats = display::StoreStats {
        database: database.to_string(),
        ping: store.ping().await,
        counts: Vec::new(),
        collections: None,
        indexes: Vec::new(),
    };
    if let Err(e) = &stats.ping {
        warn!("Document store is unreachable: {e}");
        return stats;
    }

    for collection in collections {
        stats
            .counts
            .push((collection.clone(), store.count_documents(collection).await));
    }
    stats.collections = Some(store.count_collections().await);
    for collection in collections {
        stats
            .indexes
            .push((collection.clone(), store.list_indexes(collection).await));
    }
    stats
}

/// Forwards SIGINT and SIGTERM to the run's interrupt channel.
fn spawn_signal_handlers(interrupt_tx: &watch::Sender<bool>) {
    let interrupt_tx_sigint = interrupt_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received (SIGINT), stopping run...");
            let _ = interrupt_tx_sigint.send(true);
        }
    });

    #[cfg(unix)]
    {
        let interrupt_tx_sigterm = interrupt_tx.clone();
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    debug!("SIGTERM received, stopping run...");
                    let _ = interrupt_tx_sigterm.send(true);
                }
                Err(e) => warn!("Failed to register SIGTERM handler: {e}"),
            }
        });
    }
}
