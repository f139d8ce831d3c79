//! Pool configuration (tasktree.toml)
//!
//! Values come from defaults, an optional TOML file and `TASKTREE_*`
//! environment overrides, applied in that order.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding `max_workers`
pub const ENV_MAX_WORKERS: &str = "TASKTREE_MAX_WORKERS";
/// Environment variable overriding `tick_ms`
pub const ENV_TICK_MS: &str = "TASKTREE_TICK_MS";
/// Environment variable overriding `idle_timeout_ms`
pub const ENV_IDLE_TIMEOUT_MS: &str = "TASKTREE_IDLE_TIMEOUT_MS";

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// An environment override is not a valid number
    #[error("Invalid value for {name}: {value:?}")]
    EnvError {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
    },

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Task pool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker thread bound (None = 5 × logical CPUs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    /// Dispatch loop period in milliseconds
    pub tick_ms: u64,

    /// How long the pool may sit idle before it stops itself, in milliseconds
    pub idle_timeout_ms: u64,

    /// Prefix for spawned thread names
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            tick_ms: 1000,
            idle_timeout_ms: 600_000,
            thread_name: "tasktree".to_string(),
        }
    }
}

impl PoolConfig {
    /// Load and validate a config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse and validate a config from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: PoolConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::ValidationError(
                "tick_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_workers == Some(0) {
            return Err(ConfigError::ValidationError(
                "max_workers must be greater than zero".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "thread_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `TASKTREE_*` variables from the process environment
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = parse_var(&lookup, ENV_MAX_WORKERS)? {
            self.max_workers = Some(workers as usize);
        }
        if let Some(tick) = parse_var(&lookup, ENV_TICK_MS)? {
            self.tick_ms = tick;
        }
        if let Some(idle) = parse_var(&lookup, ENV_IDLE_TIMEOUT_MS)? {
            self.idle_timeout_ms = idle;
        }
        self.validate()?;
        Ok(self)
    }

    /// Set the worker bound
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Set the dispatch period, rounded up to whole milliseconds
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick_ms = ceil_millis(tick).max(1);
        self
    }

    /// Set the idle self-stop threshold
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = ceil_millis(timeout);
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Worker bound after applying the CPU-based default
    pub fn effective_max_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(|| 5 * num_cpus::get())
    }

    /// Dispatch period, never shorter than one millisecond
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// Idle self-stop threshold
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn ceil_millis(duration: Duration) -> u64 {
    let millis = duration.as_millis() + u128::from(duration.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn parse_var<F>(lookup: &F, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvError { name, value }),
    }
}
