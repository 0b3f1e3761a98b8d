//! Saving and loading whole profile collections.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::codec::{BackupDocument, BackupFormat, FORMAT_VERSION};
use crate::cache::CacheStore;
use crate::error::{Result, ResultExt};
use crate::profile::{ProfileRecord, Variant};

/// Outcome of restoring a backup into the live cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub added: usize,
    pub updated: usize,
    /// Rejected by the store, usually a name held by another profile.
    pub skipped: usize,
}

/// A backup file found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupFile {
    pub format: BackupFormat,
    pub variant: Variant,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Reads and writes backup files in one target directory.
///
/// Format and variant are chosen per call. I/O is blocking; run it off
/// latency-sensitive paths.
#[derive(Debug, Clone)]
pub struct BackupCoordinator {
    directory: PathBuf,
}

impl BackupCoordinator {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file for a (format, variant) pair.
    pub fn path_for(&self, format: BackupFormat, variant: Variant) -> PathBuf {
        self.directory.join(format.file_name(variant))
    }

    /// Write the whole collection, replacing any previous file.
    ///
    /// The content goes to a temporary sibling first and is renamed into
    /// place, so an interrupted save leaves the old file intact.
    #[instrument(skip(self, profiles), fields(count = profiles.len()))]
    pub fn save(
        &self,
        profiles: &[ProfileRecord],
        format: BackupFormat,
        variant: Variant,
    ) -> Result<PathBuf> {
        let doc = BackupDocument::new(variant, profiles.to_vec());
        let content = format.codec().encode(&doc)?;

        std::fs::create_dir_all(&self.directory)?;
        let path = self.path_for(format, variant);
        let tmp = self
            .directory
            .join(format!(".{}.tmp", format.file_name(variant)));
        std::fs::write(&tmp, content.as_bytes())
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("replacing {}", path.display()))?;

        info!(path = %path.display(), bytes = content.len(), "Backup saved");
        Ok(path)
    }

    /// Read the collection for a (format, variant) pair.
    ///
    /// Never fails: a missing, unreadable, or malformed file yields an empty
    /// collection and a log entry. Invalid profiles inside an otherwise
    /// readable file are dropped individually.
    #[instrument(skip(self))]
    pub fn load(&self, format: BackupFormat, variant: Variant) -> Vec<ProfileRecord> {
        let path = self.path_for(format, variant);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "No backup file");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Backup file unreadable");
                return Vec::new();
            }
        };

        let doc = match format.codec().decode(&content, variant) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Backup file malformed");
                return Vec::new();
            }
        };

        if doc.format_version > FORMAT_VERSION {
            warn!(
                found = doc.format_version,
                supported = FORMAT_VERSION,
                "Backup written by a newer version, reading best-effort"
            );
        }
        if doc.variant != variant {
            warn!(found = %doc.variant, "Backup variant does not match its file name");
        }

        let total = doc.profiles.len();
        let profiles: Vec<ProfileRecord> = doc
            .profiles
            .into_iter()
            .filter_map(|mut p| {
                p.strip_reserved();
                match p.validate() {
                    Ok(()) => Some(p),
                    Err(e) => {
                        warn!(id = %p.id(), error = %e, "Dropping invalid profile from backup");
                        None
                    }
                }
            })
            .collect();

        debug!(loaded = profiles.len(), dropped = total - profiles.len(), "Backup loaded");
        profiles
    }

    /// Save the live profiles of `variant` from the cache.
    pub fn snapshot(
        &self,
        store: &CacheStore,
        format: BackupFormat,
        variant: Variant,
    ) -> Result<PathBuf> {
        let profiles: Vec<ProfileRecord> = store
            .get_all()
            .into_iter()
            .filter(|p| p.variant() == variant)
            .collect();
        self.save(&profiles, format, variant)
    }

    /// Load a backup into the cache through its normal mutation path.
    ///
    /// Known ids are updated, new ids are added, and records the store
    /// rejects are counted as skipped.
    #[instrument(skip(self, store))]
    pub fn restore(
        &self,
        store: &CacheStore,
        format: BackupFormat,
        variant: Variant,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();
        for profile in self.load(format, variant) {
            if store.contains(profile.id()) {
                if store.update(profile) {
                    report.updated += 1;
                } else {
                    report.skipped += 1;
                }
            } else if store.add(profile) {
                report.added += 1;
            } else {
                report.skipped += 1;
            }
        }
        info!(
            added = report.added,
            updated = report.updated,
            skipped = report.skipped,
            "Backup restored"
        );
        report
    }

    /// Backup files present in the directory.
    pub fn list(&self) -> Vec<BackupFile> {
        let mut found = Vec::new();
        for variant in Variant::ALL {
            for format in BackupFormat::ALL {
                let path = self.path_for(format, variant);
                if let Ok(meta) = std::fs::metadata(&path) {
                    found.push(BackupFile {
                        format,
                        variant,
                        path,
                        size_bytes: meta.len(),
                    });
                }
            }
        }
        found
    }
}
