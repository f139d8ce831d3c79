//! `tasktree info` — Display the effective pool configuration.

use crate::logging::ENV_LOG;
use std::path::Path;
use tasktree::config::{ENV_IDLE_TIMEOUT_MS, ENV_MAX_WORKERS, ENV_TICK_MS};
use tasktree::PoolConfig;

pub fn execute(config: &PoolConfig, source: Option<&Path>) -> anyhow::Result<()> {
    println!("tasktree v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("Platform:     {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    println!("CPUs:         {}", num_cpus::get());
    match source {
        Some(path) => println!("Config:       {}", path.display()),
        None => println!("Config:       (defaults)"),
    }

    println!();
    println!("Workers:      {}", config.effective_max_workers());
    println!("Tick:         {} ms", config.tick_ms);
    println!("Idle timeout: {} ms", config.idle_timeout_ms);
    println!("Threads:      {}-*", config.thread_name);

    println!();
    println!("Effective config:");
    for line in config.to_toml()?.lines() {
        println!("  {}", line);
    }

    println!();
    println!("Environment:");
    print_env(ENV_MAX_WORKERS);
    print_env(ENV_TICK_MS);
    print_env(ENV_IDLE_TIMEOUT_MS);
    print_env(ENV_LOG);

    Ok(())
}

fn print_env(var: &str) {
    match std::env::var(var) {
        Ok(val) => println!("  {} = {}", var, val),
        Err(_) => println!("  {} = (default)", var),
    }
}
