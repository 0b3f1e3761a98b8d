//! Configuration for the profile store.
//!
//! Settings are read from a TOML file (by default
//! `<config_dir>/profile_store/config.toml`). A missing default file yields
//! built-in defaults; a malformed file is a startup error.

mod loader;
pub mod path;
mod schema;

pub use loader::{
    backup_dir, database_path, load_config, load_config_from_str, load_or_default, save_config,
};
pub use path::{PathResolver, default_config_path, home_dir, resolve_path};
pub use schema::{BackupConfig, CacheConfig, PersistenceConfig, StorageConfig, StoreConfig};
