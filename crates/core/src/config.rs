//! Configuration management for the reputation miner node.
//!
//! Loaded from a TOML file (every field optional, falling back to defaults)
//! and then overridden from `REPMINE_*` environment variables.

use crate::error::{Error, Result};
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Seconds the ledger window must have been open before a new root is due.
pub const DEFAULT_WINDOW_SECS: u64 = 86_400;

/// Scheduler re-check interval while idle or after a transient ledger error.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;

pub const DEFAULT_STUCK_ALARM_SECS: u64 = 600;

pub const DEFAULT_SNAPSHOT_CACHE_SIZE: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub store: StoreConfig,
    pub oracle: OracleConfig,
    pub ledger: LedgerConfig,
    pub scheduler: SchedulerConfig,
    pub applier: ApplierConfig,
    /// Emit JSON log lines instead of human-readable text.
    pub log_json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    /// Historical snapshots kept in memory after reconstruction.
    pub snapshot_cache_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/repmine.db"),
            snapshot_cache_size: DEFAULT_SNAPSHOT_CACHE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub listen_addr: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Base URL of the ledger relay.
    pub url: String,
    /// Account this node publishes as.
    pub publisher: Option<Address>,
    pub request_timeout_secs: u64,
    /// Receipt polling interval while waiting for inclusion.
    pub receipt_poll_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            publisher: None,
            request_timeout_secs: 30,
            receipt_poll_ms: 1_000,
        }
    }
}

impl LedgerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Run the submit/confirm cycle. When off the node only serves proofs.
    pub auto_submit: bool,
    pub window_secs: u64,
    pub poll_interval_ms: u64,
    pub stuck_alarm_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            auto_submit: false,
            window_secs: DEFAULT_WINDOW_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            stuck_alarm_secs: DEFAULT_STUCK_ALARM_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stuck_alarm(&self) -> Duration {
        Duration::from_secs(self.stuck_alarm_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplierConfig {
    /// Also fold each delta into the organization-wide total for its skill.
    pub track_org_totals: bool,
}

impl NodeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// File (if given) or defaults, then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `REPMINE_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("REPMINE_DB_PATH") {
            self.store.db_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("REPMINE_LISTEN_ADDR") {
            self.oracle.listen_addr = addr;
        }
        if let Some(url) = lookup("REPMINE_LEDGER_URL") {
            self.ledger.url = url;
        }
        if let Some(publisher) = lookup("REPMINE_PUBLISHER") {
            let address = publisher
                .parse::<Address>()
                .map_err(|e| Error::Config(format!("REPMINE_PUBLISHER: {}", e)))?;
            self.ledger.publisher = Some(address);
        }
        if let Some(flag) = lookup("REPMINE_AUTO_SUBMIT") {
            self.scheduler.auto_submit = parse_flag(&flag)
                .ok_or_else(|| Error::Config(format!("REPMINE_AUTO_SUBMIT: not a boolean: {}", flag)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.snapshot_cache_size == 0 {
            return Err(Error::Config("store.snapshot_cache_size must be at least 1".into()));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(Error::Config("scheduler.poll_interval_ms must be positive".into()));
        }
        if self.scheduler.window_secs == 0 {
            return Err(Error::Config("scheduler.window_secs must be positive".into()));
        }
        if self.scheduler.stuck_alarm_secs == 0 {
            return Err(Error::Config("scheduler.stuck_alarm_secs must be positive".into()));
        }
        if self.scheduler.auto_submit && self.ledger.publisher.is_none() {
            return Err(Error::Config(
                "scheduler.auto_submit requires ledger.publisher".into(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
