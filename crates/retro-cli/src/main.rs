//! `retro-train` — thin CLI entrypoint over [`retro_pipeline::PipelineOrchestrator`].
//!
//! Parses flags into a [`RetroConfig`], wires a SIGINT/SIGTERM handler into the coordinator's
//! cooperative cancellation, and drives the pipeline. No domain logic lives here, following the
//! teacher's `crates/cli` convention of a thin entrypoint over a rich library.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use retro_core::RetroConfig;
use retro_metrics::{MetricsStore, MetricsStoreConfig};
use retro_pipeline::PipelineOrchestrator;
use retro_trust::TrustTracker;

#[derive(Parser)]
#[command(name = "retro-train", about = "Parallel retrodiction-training coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a training pipeline over a set of variables and a historical window.
    Train(TrainArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// Optional TOML configuration file. Flags override file values, which override defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated list of variables to train. Required unless provided by --config.
    #[arg(long, value_delimiter = ',')]
    variables: Vec<String>,

    #[arg(long)]
    batch_size_days: Option<u32>,

    #[arg(long)]
    overlap_days: Option<u32>,

    #[arg(long)]
    start_date: Option<String>,

    #[arg(long)]
    end_date: Option<String>,

    #[arg(long)]
    max_workers: Option<usize>,

    #[arg(long)]
    batch_limit: Option<usize>,

    #[arg(long)]
    use_worker_pool: bool,

    #[arg(long)]
    threads_per_worker: Option<usize>,

    #[arg(long)]
    dashboard_port: Option<u16>,

    #[arg(long)]
    output_file: Option<String>,

    #[arg(long)]
    s3_output_file: Option<String>,

    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    log_dir: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    let Commands::Train(args) = cli.command;

    let mut config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            process::exit(1);
        }
    };
    config.apply_env_overrides();
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        process::exit(1);
    }

    init_logging(&config.log_level);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        if let Err(e) = ctrlc::set_handler(move || {
            tracing::warn!(target: "retro::cli", "signal received, requesting cooperative shutdown");
            cancel.store(true, Ordering::Relaxed);
        }) {
            eprintln!("warning: failed to install signal handler: {e}");
        }
    }

    let tracker = Arc::new(TrustTracker::new());
    let metrics_store_config = MetricsStoreConfig {
        storage_root: PathBuf::from(&config.log_dir).join("metrics"),
        ..MetricsStoreConfig::default()
    };
    let metrics_store = match MetricsStore::open(metrics_store_config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("failed to open metrics store: {e}");
            process::exit(1);
        }
    };

    let orchestrator = PipelineOrchestrator::with_cancel(None, Some(cancel));
    match orchestrator.execute(&config, tracker, metrics_store) {
        Ok(ctx) => {
            if let Some(summary) = &ctx.training_results {
                if let Ok(text) = serde_json::to_string_pretty(summary) {
                    println!("{text}");
                }
            }
            process::exit(0);
        }
        Err(e) => {
            eprintln!("training failed: {e}");
            process::exit(1);
        }
    }
}

/// Builds a [`RetroConfig`] from an optional file, overlaid with any flags the user passed.
fn build_config(args: &TrainArgs) -> Result<RetroConfig, String> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
            toml::from_str::<RetroConfig>(&text).map_err(|e| format!("parsing {}: {e}", path.display()))?
        }
        None => {
            if args.variables.is_empty() {
                return Err("--variables is required unless --config is given".to_string());
            }
            RetroConfig::new(Vec::new())
        }
    };

    if !args.variables.is_empty() {
        config.variables = args.variables.clone();
    }
    if let Some(v) = args.batch_size_days {
        config.batch_size_days = v;
    }
    if let Some(v) = args.overlap_days {
        config.overlap_days = v;
    }
    if let Some(v) = &args.start_date {
        config.start_date = v.clone();
    }
    if args.end_date.is_some() {
        config.end_date = args.end_date.clone();
    }
    if args.max_workers.is_some() {
        config.max_workers = args.max_workers;
    }
    if args.batch_limit.is_some() {
        config.batch_limit = args.batch_limit;
    }
    if args.use_worker_pool {
        config.use_worker_pool = true;
    }
    if let Some(v) = args.threads_per_worker {
        config.threads_per_worker = v;
    }
    if let Some(v) = args.dashboard_port {
        config.dashboard_port = v;
    }
    if args.output_file.is_some() {
        config.output_file = args.output_file.clone();
    }
    if args.s3_output_file.is_some() {
        config.s3_output_file = args.s3_output_file.clone();
    }
    if let Some(v) = &args.log_level {
        config.log_level = v.clone();
    }
    if let Some(v) = &args.log_dir {
        config.log_dir = v.clone();
    }

    if config.variables.is_empty() {
        return Err("variables list cannot be empty".to_string());
    }

    Ok(config)
}

fn init_logging(log_level: &str) {
    let level = match log_level.to_uppercase().as_str() {
        "DEBUG" => tracing::Level::DEBUG,
        "WARNING" => tracing::Level::WARN,
        "ERROR" | "CRITICAL" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}
