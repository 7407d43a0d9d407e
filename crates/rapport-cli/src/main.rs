mod scenario;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use rapport_core::time::millis_to_iso8601;
use rapport_core::{BehaviorDriftTracker, MatchConfig, MatchEngine, MatchOptions};
use rapport_store::{DB_FILE, SqliteDriftStore, Store, load_config, resolve_base_dir};

use crate::scenario::Scenario;

#[derive(Parser)]
#[command(name = "rapport", about = "Multi-entity compatibility engine CLI")]
struct Cli {
    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    /// Engine config file (TOML). Defaults to <data dir>/rapport.toml when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a reference entity against a target group from a scenario file
    Match {
        /// Scenario JSON file
        scenario: PathBuf,

        /// Anonymized agent id; records drift for this agent
        #[arg(long)]
        agent: Option<String>,

        /// Do not read or record drift history
        #[arg(long)]
        no_drift: bool,
    },

    /// Show an agent's drift history and current phase
    Drift {
        /// Anonymized agent id
        agent: String,
    },

    /// Show drift store statistics
    Stats,

    /// Drop all but the newest drift records of an agent
    Prune {
        /// Anonymized agent id
        agent: String,

        /// Records to keep
        #[arg(long)]
        keep: usize,
    },
}

fn db_path() -> PathBuf {
    resolve_base_dir().join(DB_FILE)
}

fn open_store() -> Result<Store> {
    let path = db_path();
    Store::open(&path).with_context(|| format!("failed to open drift store {}", path.display()))
}

fn load_engine_config(cli: &Cli) -> Result<MatchConfig> {
    load_config(cli.config.as_deref(), &resolve_base_dir()).context("failed to load config")
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Match {
            scenario,
            agent,
            no_drift,
        } => cmd_match(&cli, scenario, agent.as_deref(), *no_drift),
        Commands::Drift { agent } => cmd_drift(&cli, agent),
        Commands::Stats => cmd_stats(),
        Commands::Prune { agent, keep } => cmd_prune(agent, *keep),
    }
}

fn cmd_match(cli: &Cli, path: &Path, agent: Option<&str>, no_drift: bool) -> Result<()> {
    let config = load_engine_config(cli)?;
    let scenario = Scenario::load(path)?;

    let mut builder = MatchEngine::builder()
        .profiles(Arc::new(scenario.profiles()))
        .default_estimators()
        .config(config);
    if agent.is_some() && !no_drift {
        let path = db_path();
        let store = SqliteDriftStore::open(&path)
            .with_context(|| format!("failed to open drift store {}", path.display()))?;
        builder = builder.drift_store(Arc::new(store));
    }
    let engine = builder.build().context("invalid engine configuration")?;

    let options = MatchOptions {
        agent_id: agent.map(str::to_string),
        weighting: scenario.weighting.clone(),
        skip_secondary: false,
    };
    let result = engine
        .match_entities(&scenario.reference_ref()?, &scenario.target_refs()?, &options)
        .context("match failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_drift(cli: &Cli, agent: &str) -> Result<()> {
    let config = load_engine_config(cli)?;
    let store = open_store()?;
    let history = store
        .drift_history(agent, None)
        .context("failed to read drift history")?;

    if history.is_empty() {
        println!("no drift records for {agent}");
        return Ok(());
    }

    for r in &history {
        println!(
            "{}  rate={:.4}  stability={:.4}  {}",
            millis_to_iso8601(r.timestamp.as_millis()),
            r.drift_rate,
            r.stability,
            r.phase
        );
    }

    let tracker = BehaviorDriftTracker::new(config.drift);
    match tracker.current_phase(&history) {
        Some(phase) => println!("phase:      {phase}"),
        None => println!("phase:      (insufficient history)"),
    }
    Ok(())
}

fn cmd_stats() -> Result<()> {
    let store = open_store()?;
    let stats = store.stats().context("failed to read stats")?;

    println!("agents:     {}", stats.agents);
    println!("records:    {}", stats.records);
    println!("db_size:    {:.1}KB", stats.db_size_bytes as f64 / 1024.0);
    Ok(())
}

fn cmd_prune(agent: &str, keep: usize) -> Result<()> {
    let store = open_store()?;
    let deleted = store
        .prune_agent(agent, keep)
        .context("failed to prune drift history")?;
    println!("pruned {deleted} records for {agent}");
    Ok(())
}
