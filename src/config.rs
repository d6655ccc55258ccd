//! Runtime configuration.
//!
//! A single YAML file with serde defaults for every field, so an empty or
//! absent file yields a working setup. Resolution order:
//! 1. Explicit path passed by the caller (e.g. `--config`)
//! 2. `CLEANOPS_CONFIG_PATH` environment variable
//! 3. `./cleanops.yaml` if present
//! 4. Built-in defaults
//!
//! ## Environment Variables
//! - `CLEANOPS_CONFIG_PATH` - Explicit config file
//! - `CLEANOPS_DB_PATH` - Database path (overrides the file)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "cleanops.yaml";

/// Broadcast relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Per-channel buffer size; subscribers lagging past this many signals
    /// miss the overflow and must refetch (default: 256).
    #[serde(default = "default_relay_capacity")]
    pub capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: default_relay_capacity(),
        }
    }
}

fn default_relay_capacity() -> usize {
    256
}

/// Change-feed worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Maximum journal records fetched per read (default: 256).
    #[serde(default = "default_feed_batch_size")]
    pub batch_size: i64,

    /// Idle poll interval in milliseconds, the safety net behind the commit
    /// signal (default: 2000).
    #[serde(default = "default_feed_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Initial retry delay in milliseconds when journal reads fail (default: 1000).
    #[serde(default = "default_feed_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Jitter range in milliseconds for retry delay (default: 250, meaning ±250ms).
    #[serde(default = "default_feed_retry_jitter_ms")]
    pub retry_jitter_ms: u64,

    /// Maximum retry interval in milliseconds (default: 30000).
    #[serde(default = "default_feed_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Exponential backoff multiplier (default: 2.0).
    #[serde(default = "default_feed_retry_multiplier")]
    pub retry_multiplier: f64,

    /// Journal retention window in milliseconds; older records are eligible
    /// for pruning (default: 7 days).
    #[serde(default = "default_feed_retention_ms")]
    pub retention_ms: i64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            batch_size: default_feed_batch_size(),
            poll_interval_ms: default_feed_poll_interval_ms(),
            retry_initial_ms: default_feed_retry_initial_ms(),
            retry_jitter_ms: default_feed_retry_jitter_ms(),
            retry_max_ms: default_feed_retry_max_ms(),
            retry_multiplier: default_feed_retry_multiplier(),
            retention_ms: default_feed_retention_ms(),
        }
    }
}

fn default_feed_batch_size() -> i64 {
    256
}

fn default_feed_poll_interval_ms() -> u64 {
    2_000
}

fn default_feed_retry_initial_ms() -> u64 {
    1_000
}

fn default_feed_retry_jitter_ms() -> u64 {
    250
}

fn default_feed_retry_max_ms() -> u64 {
    30_000 // 30 seconds
}

fn default_feed_retry_multiplier() -> f64 {
    2.0
}

fn default_feed_retention_ms() -> i64 {
    7 * 24 * 60 * 60 * 1_000 // 7 days
}

/// Client session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval in milliseconds for the fallback refetch that covers for a
    /// degraded feed or an unavailable relay (default: 15000).
    #[serde(default = "default_sync_refetch_interval_ms")]
    pub refetch_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refetch_interval_ms: default_sync_refetch_interval_ms(),
        }
    }
}

fn default_sync_refetch_interval_ms() -> u64 {
    15_000 // 15 seconds
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database path (default: `cleanops.db`).
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            relay: RelayConfig::default(),
            feed: FeedConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cleanops.db")
}

impl Config {
    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Resolve configuration from the standard locations, then apply
    /// environment overrides.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = explicit {
            Self::load(path)?
        } else if let Ok(env_path) = std::env::var("CLEANOPS_CONFIG_PATH") {
            Self::load(Path::new(&env_path))?
        } else {
            let local = Path::new(DEFAULT_CONFIG_FILE);
            if local.is_file() {
                Self::load(local)?
            } else {
                Config::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(db_path) = std::env::var("CLEANOPS_DB_PATH") {
            self.db_path = PathBuf::from(db_path);
        }
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
