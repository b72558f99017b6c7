//! Conveyor CLI tool.

use clap::{Parser, Subcommand};
use conveyor_core::Stage;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Conveyor job pipeline CLI", long_about = None)]
struct Cli {
    /// Coordinator configuration file
    #[arg(long, env = "CONVEYOR_CONFIG")]
    config: Option<PathBuf>,

    /// Store URL, overriding the configuration file
    #[arg(long, env = "CONVEYOR_STORE_URL")]
    store_url: Option<String>,

    /// Store password
    #[arg(long, env = "CONVEYOR_STORE_PASSWORD", hide_env_values = true)]
    store_password: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job to a stage queue
    Enqueue {
        /// Fingerprint of the request; derived from --request when omitted
        #[arg(required_unless_present = "request")]
        fingerprint: Option<String>,
        /// Raw request to fingerprint
        #[arg(long, conflicts_with = "fingerprint")]
        request: Option<String>,
        /// Target stage
        #[arg(long, default_value = "recon")]
        stage: Stage,
        /// Job payload as JSON
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Show queue depth per stage
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Release retries that are due
    Sweep,
    /// Reap jobs whose heartbeat expired
    SweepTimeouts,
    /// Run the periodic sweeper until interrupted
    RunSweeper {
        /// Seconds between sweeps, overriding the configuration file
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Validate a coordinator configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "conveyor.kdl")]
        path: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let settings = commands::Settings {
        config: cli.config,
        store_url: cli.store_url,
        store_password: cli.store_password,
    };

    match cli.command {
        Commands::Enqueue {
            fingerprint,
            request,
            stage,
            payload,
        } => {
            commands::jobs::enqueue(&settings, fingerprint, request, stage, &payload).await?;
        }
        Commands::Stats { json } => {
            commands::jobs::stats(&settings, json).await?;
        }
        Commands::Sweep => {
            commands::sweep::retries(&settings).await?;
        }
        Commands::SweepTimeouts => {
            commands::sweep::timeouts(&settings).await?;
        }
        Commands::RunSweeper { interval } => {
            commands::sweep::run(&settings, interval).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
