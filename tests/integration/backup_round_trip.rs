//! Backup files written and read back for every format.

use std::sync::Arc;

use pstore::backup::{BackupCoordinator, BackupFormat};
use pstore::cache::CacheStore;
use pstore::config::CacheConfig;
use pstore::events::ChangeNotifier;
use pstore::profile::{ProfileRecord, SettingValue, Variant};

use crate::common::fixtures::{StoreDirs, collection, profile_with_random_floats};

fn sorted(mut profiles: Vec<ProfileRecord>) -> Vec<ProfileRecord> {
    profiles.sort_by_key(ProfileRecord::id);
    profiles
}

fn new_store() -> CacheStore {
    CacheStore::new(&CacheConfig::default(), Arc::new(ChangeNotifier::new()))
}

#[test]
fn collections_round_trip_in_every_format() {
    let dirs = StoreDirs::new();
    let backups = BackupCoordinator::new(dirs.backup_dir());

    for format in BackupFormat::ALL {
        for size in [0, 1, 100] {
            let profiles = collection(size, Variant::Standard);
            backups.save(&profiles, format, Variant::Standard).unwrap();
            let loaded = backups.load(format, Variant::Standard);
            assert_eq!(
                sorted(loaded),
                sorted(profiles),
                "{format} backup of {size} profiles"
            );
        }
    }
}

#[test]
fn json_backup_preserves_float_bits() {
    let dirs = StoreDirs::new();
    let backups = BackupCoordinator::new(dirs.backup_dir());
    let profile = profile_with_random_floats("floats", 4000, 0x5eed);

    backups
        .save(std::slice::from_ref(&profile), BackupFormat::Json, Variant::Standard)
        .unwrap();
    let loaded = backups.load(BackupFormat::Json, Variant::Standard);
    assert_eq!(loaded.len(), 1);

    let mismatches: Vec<_> = profile
        .settings()
        .iter()
        .filter(|(key, value)| loaded[0].settings().get(*key) != Some(*value))
        .take(3)
        .collect();
    assert!(mismatches.is_empty(), "floats changed: {mismatches:?}");
}

#[test]
fn variants_use_separate_files() {
    let dirs = StoreDirs::new();
    let backups = BackupCoordinator::new(dirs.backup_dir());

    let standard = collection(3, Variant::Standard);
    let classic = collection(2, Variant::Classic);
    backups
        .save(&standard, BackupFormat::Json, Variant::Standard)
        .unwrap();
    backups
        .save(&classic, BackupFormat::Json, Variant::Classic)
        .unwrap();

    assert_eq!(backups.load(BackupFormat::Json, Variant::Standard).len(), 3);
    assert_eq!(backups.load(BackupFormat::Json, Variant::Classic).len(), 2);
    assert!(backups.load(BackupFormat::Yaml, Variant::Classic).is_empty());
    assert_eq!(backups.list().len(), 2);
}

#[test]
fn missing_and_corrupt_files_load_empty() {
    let dirs = StoreDirs::new();
    let backups = BackupCoordinator::new(dirs.backup_dir());
    assert!(backups.load(BackupFormat::Yaml, Variant::Standard).is_empty());

    std::fs::create_dir_all(dirs.backup_dir()).unwrap();
    std::fs::write(
        backups.path_for(BackupFormat::Json, Variant::Standard),
        "{ not json",
    )
    .unwrap();
    assert!(backups.load(BackupFormat::Json, Variant::Standard).is_empty());
}

#[test]
fn snapshot_then_restore_into_fresh_store() {
    let dirs = StoreDirs::new();
    let backups = BackupCoordinator::new(dirs.backup_dir());

    let source = new_store();
    let mut profile = ProfileRecord::new("Default");
    profile
        .set_setting("prayerSettings", "boneHandler", "Bank")
        .unwrap();
    let id = profile.id();
    source.add(profile);
    source.add(ProfileRecord::new("Legacy").with_variant(Variant::Classic));

    backups
        .snapshot(&source, BackupFormat::Yaml, Variant::Standard)
        .unwrap();

    let target = new_store();
    let report = backups.restore(&target, BackupFormat::Yaml, Variant::Standard);
    assert_eq!(report.added, 1);
    assert_eq!(report.updated, 0);
    assert_eq!(target.len(), 1);
    assert_eq!(
        target.get_setting(id, "prayerSettings", "boneHandler", None),
        Some(SettingValue::from("Bank"))
    );

    let again = backups.restore(&target, BackupFormat::Yaml, Variant::Standard);
    assert_eq!(again.updated, 1);
    assert_eq!(target.len(), 1);
}

#[test]
fn restore_skips_conflicting_names() {
    let dirs = StoreDirs::new();
    let backups = BackupCoordinator::new(dirs.backup_dir());
    backups
        .save(
            &[ProfileRecord::new("Default")],
            BackupFormat::Json,
            Variant::Standard,
        )
        .unwrap();

    let store = new_store();
    store.add(ProfileRecord::new("default"));
    let report = backups.restore(&store, BackupFormat::Json, Variant::Standard);
    assert_eq!(report.skipped, 1);
    assert_eq!(store.len(), 1);
}
