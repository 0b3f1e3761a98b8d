//! Configuration file structure.
//!
//! Every section has serde defaults, so an empty or partial file is valid.
//!
//! ```toml
//! [cache]
//! ttl_secs = 3600
//! max_entries = 1000
//! sweep_interval_secs = 60
//!
//! [storage]
//! database_path = "~/.local/share/profile_store/profiles.db"
//! table = "profiles"
//!
//! [persistence]
//! max_retries = 3
//! retry_delay_ms = 250
//! batch_window_ms = 50
//!
//! [backup]
//! directory = "~/profile-backups"
//! format = "json"
//! variant = "standard"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::backup::BackupFormat;
use crate::error::{Result, StoreError};
use crate::profile::Variant;

/// Top-level store configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub persistence: PersistenceConfig,
    pub backup: BackupConfig,
}

impl StoreConfig {
    /// Validate value ranges.
    pub fn validate(&self) -> Result<()> {
        trace!("Validating store config");
        if self.cache.max_entries == 0 {
            return Err(StoreError::ConfigInvalid(
                "cache.max_entries must be at least 1".to_string(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(StoreError::ConfigInvalid(
                "cache.ttl_secs must be at least 1".to_string(),
            ));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(StoreError::ConfigInvalid(
                "cache.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        let table = &self.storage.table;
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::ConfigInvalid(format!(
                "storage.table '{table}' must be non-empty and use [A-Za-z0-9_]"
            )));
        }
        Ok(())
    }
}

/// In-memory cache bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds an entry lives after its last write.
    pub ttl_secs: u64,
    /// Maximum number of cached profiles before LRU reclamation.
    pub max_entries: usize,
    /// Seconds between background eviction passes.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_entries: 1000,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Relational backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file. Defaults to the platform data directory.
    pub database_path: Option<PathBuf>,
    /// Table holding one row per profile.
    pub table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            table: "profiles".to_string(),
        }
    }
}

/// Background persistence behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Attempts after the first failed batch write.
    pub max_retries: u32,
    /// Delay between batch retries.
    pub retry_delay_ms: u64,
    /// How long the worker waits to coalesce further changes into a batch.
    pub batch_window_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 250,
            batch_window_ms: 50,
        }
    }
}

impl PersistenceConfig {
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub const fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}

/// Backup defaults used when the caller does not pass explicit values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Backup directory. Defaults to the platform data directory.
    pub directory: Option<PathBuf>,
    pub format: BackupFormat,
    pub variant: Variant,
}
