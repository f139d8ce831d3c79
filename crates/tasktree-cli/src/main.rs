//! tasktree command-line tool
//!
//! Runs a demonstration workload on the task pool and shows the effective
//! pool configuration.

mod commands;
mod logging;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tasktree::PoolConfig;

#[derive(Parser)]
#[command(name = "tasktree")]
#[command(about = "Hierarchical task pool driver", long_about = None)]
#[command(version)]
struct Cli {
    /// Pool configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log every task transition
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a parent task that waits on its children, plus a scheduled task
    Run {
        /// Number of child tasks
        #[arg(short = 'n', long, default_value_t = 3)]
        children: usize,
        /// Work steps per child
        #[arg(long, default_value_t = 5)]
        steps: u32,
        /// Duration of one step in milliseconds
        #[arg(long, default_value_t = 100)]
        step_ms: u64,
        /// Delay before the scheduled task becomes due, in milliseconds
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// Show the effective pool configuration
    Info,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PoolConfig> {
    let config = match path {
        Some(path) => PoolConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PoolConfig::default(),
    };
    config
        .with_env_overrides()
        .context("applying environment overrides")
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            children,
            steps,
            step_ms,
            delay_ms,
            timeout,
        } => commands::run::execute(
            config,
            commands::run::RunOptions {
                children,
                steps,
                step: std::time::Duration::from_millis(step_ms),
                delay: std::time::Duration::from_millis(delay_ms),
                timeout: std::time::Duration::from_secs(timeout),
            },
        )
        .map(|_| ()),

        Commands::Info => commands::info::execute(&config, cli.config.as_deref()),
    }
}
