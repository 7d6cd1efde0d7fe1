//! exv: runs batches of autoscaling experiments against a cluster.
//!
//! For every planned experiment and iteration the release is deployed,
//! the required services are awaited, a load-generator pod is driven to
//! completion and its results are unpacked under the observation root.
//!
//! # Usage
//!
//! ```text
//! exv plan --config exv.toml
//! exv run --config exv.toml --skip-build
//! ```
//!
//! SIGINT or SIGUSR1 aborts the current iteration: the load generators
//! are force-deleted, the release is removed and the batch stops. A second
//! signal exits immediately.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

mod commands;
mod signals;

#[derive(Parser)]
#[command(
    name = "exv",
    about = "Autoscaling experiment runner",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, deploy and measure every planned experiment.
    Run(RunArgs),
    /// Print the planned experiments and exit.
    Plan {
        /// Experiment configuration file.
        #[arg(short, long, default_value = "exv.toml")]
        config: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Experiment configuration file.
    #[arg(short, long, default_value = "exv.toml")]
    config: PathBuf,

    /// Reuse existing observation directories instead of failing.
    #[arg(long, alias = "dirty")]
    reuse_output: bool,

    /// Do not build images before each experiment.
    #[arg(long)]
    skip_build: bool,

    /// Only list the planned experiments.
    #[arg(long)]
    dry_run: bool,

    /// Override the configured number of iterations per experiment.
    #[arg(short = 'n', long)]
    iterations: Option<u32>,

    /// Override the configured observation root.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,exv=debug"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Plan { config } => commands::plan::plan(&config),
    }
}
