//! Configuration for opsgate
//!
//! Two layers: a TOML file with `[batch]`, `[poll]` and `[pool]` sections,
//! and CLI/environment overrides via clap. A host CLI flattens `Args` into
//! its own parser and calls `resolve()`.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::BatchConfig;
use crate::logging::LogFormat;
use crate::poll::PollConfig;
use crate::pool::PoolConfig;
use crate::types::{OpsError, Result};

/// File configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Config {
    /// Load from `path`; a missing file yields defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| OpsError::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| OpsError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| OpsError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_ms == 0 {
            return Err(OpsError::Config("poll.interval_ms must be greater than 0".into()));
        }
        if self.poll.timeout_ms < self.poll.interval_ms {
            return Err(OpsError::Config(
                "poll.timeout_ms must be greater than or equal to poll.interval_ms".into(),
            ));
        }
        if self.batch.item_timeout_ms == Some(0) {
            return Err(OpsError::Config("batch.item_timeout_ms must be greater than 0".into()));
        }
        if self.pool.handle_ttl_ms == Some(0) {
            return Err(OpsError::Config("pool.handle_ttl_ms must be greater than 0".into()));
        }
        Ok(())
    }
}

/// CLI and environment overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "opsgate")]
#[command(about = "Pooled clients, bounded batches and convergence polling")]
pub struct Args {
    /// Path to configuration file
    #[arg(long, env = "OPSGATE_CONFIG", default_value = "opsgate.toml")]
    pub config: PathBuf,

    /// Maximum work items in flight (0 uses the default of 3)
    #[arg(long, env = "OPSGATE_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Per-item time limit in milliseconds
    #[arg(long, env = "OPSGATE_ITEM_TIMEOUT_MS")]
    pub item_timeout_ms: Option<u64>,

    /// Time between convergence checks in milliseconds
    #[arg(long, env = "OPSGATE_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Overall convergence deadline in milliseconds
    #[arg(long, env = "OPSGATE_POLL_TIMEOUT_MS")]
    pub poll_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Parse from the process arguments after loading a `.env` file if present
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::parse()
    }

    pub fn log_format(&self) -> LogFormat {
        if self.log_json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }

    /// Load the config file, apply overrides, validate
    pub fn resolve(&self) -> Result<Config> {
        let mut config = Config::load(&self.config)?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut Config) {
        if let Some(concurrency) = self.concurrency {
            config.batch.concurrency = concurrency;
        }
        if let Some(item_timeout_ms) = self.item_timeout_ms {
            config.batch.item_timeout_ms = Some(item_timeout_ms);
        }
        if let Some(interval_ms) = self.poll_interval_ms {
            config.poll.interval_ms = interval_ms;
        }
        if let Some(timeout_ms) = self.poll_timeout_ms {
            config.poll.timeout_ms = timeout_ms;
        }
    }
}
