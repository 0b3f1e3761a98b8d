//! Test fixture helpers for profile data and temporary store directories.

use std::path::{Path, PathBuf};

use pstore::config::StoreConfig;
use pstore::profile::{ProfileRecord, SettingValue, Variant};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

/// A profile with `count` settings spread over a few categories and types.
#[must_use]
pub fn profile_with_settings(name: &str, count: usize) -> ProfileRecord {
    let mut profile = ProfileRecord::new(name);
    for i in 0..count {
        let category = format!("category{}", i % 3);
        let key = format!("key{i}");
        let value = match i % 4 {
            0 => SettingValue::Text(format!("value-{i}")),
            1 => SettingValue::Int(i64::try_from(i).unwrap_or(0)),
            2 => SettingValue::Bool(i % 8 == 2),
            _ => SettingValue::List(vec!["a".into(), SettingValue::Float(1.5)]),
        };
        profile
            .set_setting(&category, &key, value)
            .expect("fixture setting is valid");
    }
    profile
}

/// A profile holding `count` seeded random finite floats, half drawn from
/// the whole `f64` bit space and half from ordinary magnitudes.
#[must_use]
pub fn profile_with_random_floats(name: &str, count: usize, seed: u64) -> ProfileRecord {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut profile = ProfileRecord::new(name);
    let mut i = 0;
    while i < count {
        let value = if i % 2 == 0 {
            f64::from_bits(rng.r#gen::<u64>())
        } else {
            rng.gen_range(-1000.0..1000.0)
        };
        if !value.is_finite() {
            continue;
        }
        profile
            .set_setting(&format!("floats{}", i % 10), &format!("f{i}"), value)
            .expect("fixture setting is valid");
        i += 1;
    }
    profile
}

/// `count` uniquely named profiles of one variant.
#[must_use]
pub fn collection(count: usize, variant: Variant) -> Vec<ProfileRecord> {
    (0..count)
        .map(|i| profile_with_settings(&format!("profile-{i:03}"), i % 7).with_variant(variant))
        .collect()
}

/// Isolated directories for a database and backups.
pub struct StoreDirs {
    pub dir: TempDir,
}

impl StoreDirs {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("profiles.db")
    }

    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    /// Default configuration pointed at these directories.
    #[must_use]
    pub fn config(&self) -> StoreConfig {
        let mut config = StoreConfig::default();
        config.storage.database_path = Some(self.db_path());
        config.backup.directory = Some(self.backup_dir());
        config.persistence.batch_window_ms = 5;
        config.persistence.retry_delay_ms = 5;
        config
    }
}

impl Default for StoreDirs {
    fn default() -> Self {
        Self::new()
    }
}
