//! Logging initialization
//!
//! `TASKTREE_LOG` takes an `EnvFilter` directive; without it the level is
//! `info`, or `debug` with `--verbose`.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive
pub const ENV_LOG: &str = "TASKTREE_LOG";

pub fn init(verbose: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_env(ENV_LOG)
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    tracing::debug!(verbose, "logging initialized");
    Ok(())
}
