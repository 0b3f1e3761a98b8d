//! Backup file formats.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::profile::{ProfileRecord, Variant};

/// Current envelope version written by [`BackupDocument::new`].
pub const FORMAT_VERSION: u32 = 1;

/// Serialization format of a backup file.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BackupFormat {
    #[default]
    Json,
    Yaml,
}

impl BackupFormat {
    pub const ALL: [Self; 2] = [Self::Json, Self::Yaml];

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }

    /// File holding the whole collection for `variant` in this format.
    pub fn file_name(self, variant: Variant) -> String {
        format!("profiles-{variant}.{}", self.extension())
    }

    pub fn codec(self) -> &'static dyn BackupCodec {
        match self {
            Self::Json => &JsonCodec,
            Self::Yaml => &YamlCodec,
        }
    }
}

impl fmt::Display for BackupFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for BackupFormat {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(StoreError::UnknownFormat(s.to_string())),
        }
    }
}

/// Versioned envelope around a profile collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub format_version: u32,
    pub variant: Variant,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub profiles: Vec<ProfileRecord>,
}

impl BackupDocument {
    pub fn new(variant: Variant, profiles: Vec<ProfileRecord>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            variant,
            created_at: Utc::now(),
            profiles,
        }
    }
}

/// Accepted on read: the envelope, or a bare list from older exports.
#[derive(Deserialize)]
#[serde(untagged)]
enum Contents {
    Envelope(BackupDocument),
    Bare(Vec<ProfileRecord>),
}

impl Contents {
    fn into_document(self, fallback_variant: Variant) -> BackupDocument {
        match self {
            Self::Envelope(doc) => doc,
            Self::Bare(profiles) => BackupDocument {
                format_version: 0,
                variant: fallback_variant,
                created_at: Utc::now(),
                profiles,
            },
        }
    }
}

/// Encodes and decodes a whole collection.
pub trait BackupCodec: Send + Sync {
    fn encode(&self, doc: &BackupDocument) -> Result<String>;

    /// Decode file content. Bare lists are tagged with `variant`.
    fn decode(&self, content: &str, variant: Variant) -> Result<BackupDocument>;
}

/// Pretty-printed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl BackupCodec for JsonCodec {
    fn encode(&self, doc: &BackupDocument) -> Result<String> {
        Ok(serde_json::to_string_pretty(doc)?)
    }

    fn decode(&self, content: &str, variant: Variant) -> Result<BackupDocument> {
        let contents: Contents = serde_json::from_str(content)?;
        Ok(contents.into_document(variant))
    }
}

/// YAML.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl BackupCodec for YamlCodec {
    fn encode(&self, doc: &BackupDocument) -> Result<String> {
        Ok(serde_yaml::to_string(doc)?)
    }

    fn decode(&self, content: &str, variant: Variant) -> Result<BackupDocument> {
        let contents: Contents = serde_yaml::from_str(content)?;
        Ok(contents.into_document(variant))
    }
}
