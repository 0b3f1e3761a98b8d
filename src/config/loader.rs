//! Loading and saving the TOML configuration file.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, trace};

use super::path::{self, PathResolver};
use super::schema::StoreConfig;
use crate::error::{Result, StoreError};

/// Load a configuration file, resolving relative paths against its directory.
///
/// # Errors
///
/// Returns an error if:
/// - The file does not exist or cannot be read
/// - The content is not valid TOML for [`StoreConfig`]
/// - Validation fails
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<StoreConfig> {
    let path = path.as_ref();
    info!("Loading configuration file");

    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::ConfigNotFound {
                path: path.display().to_string(),
            }
        } else {
            StoreError::Io(e)
        }
    })?;
    debug!(bytes = content.len(), "Read config file");

    let mut config = load_config_from_str(&content)?;

    let resolver = PathResolver::new(path)?;
    if let Some(db) = config.storage.database_path.take() {
        config.storage.database_path = Some(resolver.resolve(&db)?);
    }
    if let Some(dir) = config.backup.directory.take() {
        config.backup.directory = Some(resolver.resolve(&dir)?);
    }

    info!(
        ttl_secs = config.cache.ttl_secs,
        max_entries = config.cache.max_entries,
        table = %config.storage.table,
        "Configuration loaded and validated"
    );
    Ok(config)
}

/// Parse and validate configuration content.
pub fn load_config_from_str(content: &str) -> Result<StoreConfig> {
    trace!(content_len = content.len(), "Parsing config content");
    let config: StoreConfig =
        toml::from_str(content).map_err(|e| StoreError::ConfigParse(format!("TOML: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Load an explicit config file, or the default one if it exists.
///
/// An explicit path must exist. A missing default file yields defaults.
pub fn load_or_default(explicit: Option<&Path>) -> Result<StoreConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }

    let default_path = path::default_config_path()?;
    if default_path.exists() {
        load_config(&default_path)
    } else {
        debug!(path = %default_path.display(), "No config file, using defaults");
        Ok(StoreConfig::default())
    }
}

/// Write a configuration file, creating parent directories.
#[instrument(skip(config), fields(path = %path.as_ref().display()))]
pub fn save_config<P: AsRef<Path>>(config: &StoreConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    let content =
        toml::to_string_pretty(config).map_err(|e| StoreError::ConfigParse(format!("TOML: {e}")))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    info!("Configuration saved");
    Ok(())
}

/// Effective database path: configured, or the platform default.
pub fn database_path(config: &StoreConfig) -> Result<PathBuf> {
    match &config.storage.database_path {
        Some(p) => path::resolve_path(p, Path::new(".")),
        None => path::default_database_path(),
    }
}

/// Effective backup directory: configured, or the platform default.
pub fn backup_dir(config: &StoreConfig) -> Result<PathBuf> {
    match &config.backup.directory {
        Some(p) => path::resolve_path(p, Path::new(".")),
        None => path::default_backup_dir(),
    }
}
