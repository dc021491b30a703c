mod display;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use reqwatch_ai::ChatGenerator;
use reqwatch_core::{MonitorConfig, MonitorStatistics};
use reqwatch_store::{SnapshotStore, StateTracker};
use reqwatch_sync::{GeneratedExtraction, HttpTracker, Orchestrator, RequirementFilter, scheduler};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "reqwatch.toml";

#[derive(Parser, Debug)]
#[command(name = "reqwatch", version, about = "Requirement change monitor and artifact re-extraction")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Config file. Defaults apply when omitted and ./reqwatch.toml is absent.
    #[arg(long, global = true, env = "REQWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `state_dir` from the config file.
    #[arg(long, global = true, env = "REQWATCH_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[arg(long, global = true, env = "REQWATCH_TRACKER_URL")]
    tracker_url: Option<String>,

    #[arg(long, global = true, env = "REQWATCH_TRACKER_TOKEN", hide_env_values = true)]
    tracker_token: Option<String>,

    #[arg(
        long,
        global = true,
        env = "REQWATCH_AI_ENDPOINT",
        default_value = "https://api.openai.com/v1"
    )]
    ai_endpoint: String,

    #[arg(long, global = true, env = "REQWATCH_AI_KEY", hide_env_values = true)]
    ai_key: Option<String>,

    #[arg(long, global = true, env = "REQWATCH_AI_MODEL", default_value = "gpt-4o-mini")]
    ai_model: String,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor-wide statistics, or one requirement's card.
    Stats { id: Option<String> },
    #[command(flatten)]
    Tracker(TrackerCommand),
}

/// Commands that talk to the tracker.
#[derive(Subcommand, Debug)]
enum TrackerCommand {
    /// Poll monitored requirements until interrupted.
    Watch,
    /// Run one cycle over the given IDs, or over every monitored requirement.
    Check { ids: Vec<String> },
    /// Check one monitored requirement now.
    ForceCheck { id: String },
    /// Extract regardless of threshold, cap, and cooldown.
    ForceExtract { id: String },
    /// Reset extraction counters, then check again.
    Reset { id: String },
    /// Start monitoring a requirement and check it immediately.
    Add { id: String },
    /// Stop monitoring a requirement and delete its records.
    Remove { id: String },
    /// List tracker requirements that are not monitored yet.
    Discover {
        #[arg(long)]
        project: Option<String>,
        #[arg(long = "type")]
        item_type: Option<String>,
        #[arg(long = "state")]
        states: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Start monitoring everything found.
        #[arg(long)]
        add: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let global = cli.global;
    init_tracing(&global.log_level);
    info!("reqwatch v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&global)?;
    match cli.command {
        Command::Stats { id } => stats(&config, id.as_deref(), global.json),
        Command::Tracker(command) => {
            let orchestrator = Arc::new(build_orchestrator(&global, config)?);
            run(orchestrator, command, global.json).await
        }
    }
}

async fn run(
    orchestrator: Arc<Orchestrator>,
    command: TrackerCommand,
    as_json: bool,
) -> anyhow::Result<()> {
    match command {
        TrackerCommand::Watch => {
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, finishing in-flight checks");
                    signal.cancel();
                }
            });
            let cycles = scheduler::poll(orchestrator, shutdown).await;
            info!(cycles, "stopped");
        }
        TrackerCommand::Check { ids } => {
            let results = if ids.is_empty() {
                orchestrator
                    .run_monitored(&CancellationToken::new())
                    .await
                    .context("failed to list monitored requirements")?
            } else {
                orchestrator.run_cycle(&ids).await
            };
            if as_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                display::print_cycle_results(&results);
            }
        }
        TrackerCommand::ForceCheck { id } => {
            let result = orchestrator
                .force_check(&id)
                .await
                .with_context(|| format!("force check of {id} failed"))?;
            display::print_result(&id, &result, as_json)?;
        }
        TrackerCommand::ForceExtract { id } => {
            let result = orchestrator
                .force_extract(&id)
                .await
                .with_context(|| format!("forced extraction of {id} failed"))?;
            display::print_result(&id, &result, as_json)?;
        }
        TrackerCommand::Reset { id } => {
            let result = orchestrator
                .force_reset(&id)
                .await
                .with_context(|| format!("reset of {id} failed"))?;
            display::print_result(&id, &result, as_json)?;
        }
        TrackerCommand::Add { id } => {
            let result = orchestrator
                .add_requirement(&id)
                .await
                .with_context(|| format!("failed to add {id}"))?;
            display::print_result(&id, &result, as_json)?;
        }
        TrackerCommand::Remove { id } => {
            let removed = orchestrator
                .remove_requirement(&id)
                .await
                .with_context(|| format!("failed to remove {id}"))?;
            if as_json {
                println!("{}", json!({ "requirement_id": id, "removed": removed }));
            } else if removed {
                println!("Removed {id}");
            } else {
                println!("{id} was not monitored");
            }
        }
        TrackerCommand::Discover {
            project,
            item_type,
            states,
            limit,
            add,
        } => {
            let filter = RequirementFilter {
                project,
                item_type,
                states,
                limit,
            };
            let found = orchestrator
                .discover(&filter)
                .await
                .context("failed to list tracker requirements")?;
            if add {
                for id in &found {
                    orchestrator
                        .add_requirement(id)
                        .await
                        .with_context(|| format!("failed to add {id}"))?;
                }
            }
            if as_json {
                println!("{}", json!({ "found": found, "added": add }));
            } else {
                display::print_discovered(&found, add);
            }
        }
    }
    Ok(())
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &GlobalArgs) -> anyhow::Result<MonitorConfig> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => read_config(Path::new(DEFAULT_CONFIG))?,
        None => {
            info!("no config file, using defaults");
            MonitorConfig::default()
        }
    };
    if let Some(dir) = &args.state_dir {
        config.state_dir = dir.clone();
    }
    Ok(config)
}

fn read_config(path: &Path) -> anyhow::Result<MonitorConfig> {
    MonitorConfig::load(path).with_context(|| format!("invalid config {}", path.display()))
}

fn build_orchestrator(args: &GlobalArgs, config: MonitorConfig) -> anyhow::Result<Orchestrator> {
    let Some(url) = &args.tracker_url else {
        bail!("--tracker-url (or REQWATCH_TRACKER_URL) is required for this command");
    };
    let mut tracker = HttpTracker::new(url).with_context(|| format!("bad tracker URL {url}"))?;
    if let Some(token) = &args.tracker_token {
        tracker = tracker.with_token(token.clone());
    }
    let tracker = Arc::new(tracker);

    let mut generator = ChatGenerator::new(args.ai_endpoint.clone(), args.ai_model.clone());
    if let Some(key) = &args.ai_key {
        generator = generator.with_api_key(key.clone());
    }
    let extractor = GeneratedExtraction::new(Arc::new(generator), tracker.clone());

    let (snapshots, states) = open_stores(&config)?;
    Ok(Orchestrator::new(
        config,
        tracker,
        Arc::new(extractor),
        snapshots,
        states,
    ))
}

fn open_stores(config: &MonitorConfig) -> anyhow::Result<(SnapshotStore, StateTracker)> {
    let dir = &config.state_dir;
    let snapshots = SnapshotStore::open(dir)
        .with_context(|| format!("failed to open snapshot store in {}", dir.display()))?;
    let states = StateTracker::open(dir)
        .with_context(|| format!("failed to open state store in {}", dir.display()))?;
    info!(state_dir = %dir.display(), "opened stores");
    Ok((snapshots, states))
}

/// Statistics straight from the stores; no tracker needed.
fn stats(config: &MonitorConfig, id: Option<&str>, as_json: bool) -> anyhow::Result<()> {
    let (_, states) = open_stores(config)?;
    let threshold = config.error_flag_threshold;
    match id {
        Some(id) => {
            let state = states
                .get(id)
                .with_context(|| format!("failed to read state of {id}"))?
                .with_context(|| format!("{id} is not monitored"))?;
            let card = reqwatch_core::RequirementStatistics::from_state(&state, threshold);
            if as_json {
                println!("{}", serde_json::to_string_pretty(&card)?);
            } else {
                display::print_requirement_card(&card);
            }
        }
        None => {
            let all = states.all().context("failed to read states")?;
            let summary = MonitorStatistics::aggregate(&all, threshold);
            if as_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                display::print_summary(&summary);
            }
        }
    }
    Ok(())
}
