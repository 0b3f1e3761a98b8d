//! Error types for profile store operations.

use thiserror::Error;
use uuid::Uuid;

use crate::profile::PathError;

/// Primary error type for profile store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    // Lookup errors
    #[error("Profile not found: {id}")]
    ProfileNotFound { id: Uuid },

    #[error("No profile named '{name}'")]
    ProfileNameNotFound { name: String },

    // Validation errors
    #[error("A profile named '{name}' already exists")]
    DuplicateName { name: String },

    #[error("Invalid profile: {0}")]
    Validation(String),

    #[error("Invalid setting path: {0}")]
    SettingPath(#[from] PathError),

    // Persistence errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown backup format '{0}': expected json or yaml")]
    UnknownFormat(String),

    // Configuration errors
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Startup failed: {0}")]
    Startup(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Returns true if the error is recoverable by the user.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProfileNotFound { .. }
                | Self::ProfileNameNotFound { .. }
                | Self::DuplicateName { .. }
                | Self::Validation(_)
                | Self::SettingPath(_)
                | Self::UnknownFormat(_)
                | Self::ConfigNotFound { .. }
                | Self::ConfigInvalid(_)
        )
    }

    /// Returns a suggestion for how to fix the error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ProfileNotFound { .. } | Self::ProfileNameNotFound { .. } => {
                Some("Run: pstore list")
            }
            Self::DuplicateName { .. } => Some("Profile names are compared case-insensitively"),
            Self::SettingPath(_) => Some("Use dotted paths such as category.key"),
            Self::UnknownFormat(_) => Some("Use --format json or --format yaml"),
            Self::ConfigNotFound { .. } => Some("Run: pstore config --init"),
            Self::Startup(_) => Some("Check that the database path is writable"),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON: {e}"))
    }
}

impl From<serde_yaml::Error> for StoreError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(format!("YAML: {e}"))
    }
}

/// Convenience type alias for Results using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| StoreError::Other(format!("{}: {e}", f().into())))
    }
}
