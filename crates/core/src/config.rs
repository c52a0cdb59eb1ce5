//! Configuration types shared across crates.

use crate::backoff::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Transfer engine settings.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Persistent queue settings.
    #[serde(default)]
    pub store: StoreConfig,
}

impl AppConfig {
    /// Validate all sections.
    pub fn validate(&self) -> crate::Result<()> {
        self.transfer.validate()?;
        self.store.validate()
    }
}

/// Transfer engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum size of one block in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    /// Maximum tasks running at once per user.
    #[serde(default = "default_max_parallel_transfers")]
    pub max_parallel_transfers: u32,
    /// Maximum blocks encrypted or transferred at once within one task.
    #[serde(default = "default_max_parallel_blocks")]
    pub max_parallel_blocks: u32,
    /// Fail downloads whose block signatures do not verify, instead of logging.
    #[serde(default)]
    pub strict_signature_check: bool,
    /// Scratch directory for block files.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// How often idle workers look for tasks whose backoff has elapsed, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Retry backoff.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_block_size() -> u64 {
    crate::DEFAULT_BLOCK_SIZE
}

fn default_max_parallel_transfers() -> u32 {
    3
}

fn default_max_parallel_blocks() -> u32 {
    4
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("vaultline")
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            max_parallel_transfers: default_max_parallel_transfers(),
            max_parallel_blocks: default_max_parallel_blocks(),
            strict_signature_check: false,
            work_dir: default_work_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl TransferConfig {
    /// Validate transfer configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        if self.block_size == 0 || self.block_size > crate::MAX_BLOCK_SIZE {
            return Err(crate::Error::InvalidBlockSize {
                size: self.block_size,
                max: crate::MAX_BLOCK_SIZE,
            });
        }
        if self.max_parallel_transfers == 0 {
            return Err(crate::Error::InvalidConfig(
                "max_parallel_transfers must be at least 1".to_string(),
            ));
        }
        if self.max_parallel_blocks == 0 {
            return Err(crate::Error::InvalidConfig(
                "max_parallel_blocks must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        self.backoff.validate()
    }

    /// Idle poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Retry backoff configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    /// Cap on any single delay in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
    /// Retryable failures tolerated before a task fails permanently.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_max_retries() -> u32 {
    5
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            max_ms: default_backoff_max_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl BackoffConfig {
    /// Validate backoff invariants.
    pub fn validate(&self) -> crate::Result<()> {
        if self.base_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "backoff base_ms must be positive".to_string(),
            ));
        }
        if self.max_ms < self.base_ms {
            return Err(crate::Error::InvalidConfig(format!(
                "backoff max_ms ({}) is below base_ms ({})",
                self.max_ms, self.base_ms
            )));
        }
        Ok(())
    }

    /// Build the runtime policy.
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_ms),
            Duration::from_millis(self.max_ms),
            self.max_retries,
        )
    }
}

/// Persistent queue configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// How long to wait on a locked database before failing.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/transfers.db")
}

fn default_busy_timeout_secs() -> u64 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl StoreConfig {
    /// Validate store invariants.
    pub fn validate(&self) -> crate::Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(crate::Error::InvalidConfig(
                "store path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
