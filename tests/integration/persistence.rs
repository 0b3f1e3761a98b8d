//! Persistence against on-disk databases.

use std::sync::{Arc, Mutex};

use pstore::config::PersistenceConfig;
use pstore::events::{ChangeEvent, ChangeObserver};
use pstore::persist::{PersistenceWorker, SchemaSynchronizer};
use pstore::profile::{ProfileRecord, SettingValue, Variant};

use crate::common::fixtures::{
    StoreDirs, collection, profile_with_random_floats, profile_with_settings,
};

const TABLE: &str = "profiles";

#[test]
fn rows_survive_reopen() {
    let dirs = StoreDirs::new();
    let profiles = collection(25, Variant::Standard);
    {
        let mut sync = SchemaSynchronizer::<ProfileRecord>::open(dirs.db_path(), TABLE).unwrap();
        assert_eq!(sync.upsert_batch(&profiles).unwrap(), 25);
    }

    let sync = SchemaSynchronizer::<ProfileRecord>::open(dirs.db_path(), TABLE).unwrap();
    let mut loaded = sync.load_all().unwrap();
    loaded.sort_by(|a, b| a.name().cmp(b.name()));
    assert_eq!(loaded.len(), 25);
    for (expected, actual) in profiles.iter().zip(&loaded) {
        assert_eq!(expected.id(), actual.id());
        assert_eq!(expected.settings(), actual.settings());
        assert_eq!(expected.last_updated(), actual.last_updated());
    }
}

#[test]
fn repeated_upserts_keep_one_row_per_id() {
    let dirs = StoreDirs::new();
    let mut sync = SchemaSynchronizer::<ProfileRecord>::open(dirs.db_path(), TABLE).unwrap();
    let mut profile = profile_with_settings("Default", 3);

    sync.upsert_batch(std::slice::from_ref(&profile)).unwrap();
    profile
        .set_setting("prayerSettings", "boneHandler", "Bank")
        .unwrap();
    sync.upsert_batch(std::slice::from_ref(&profile)).unwrap();

    assert_eq!(sync.count().unwrap(), 1);
    let loaded = sync.load_all().unwrap();
    assert_eq!(
        loaded[0].get_setting("prayerSettings", "boneHandler", None),
        Some(SettingValue::from("Bank"))
    );
}

#[test]
fn payload_preserves_float_bits() {
    let dirs = StoreDirs::new();
    let profile = profile_with_random_floats("floats", 4000, 0xf10a7);
    {
        let mut sync = SchemaSynchronizer::<ProfileRecord>::open(dirs.db_path(), TABLE).unwrap();
        sync.upsert_batch(std::slice::from_ref(&profile)).unwrap();
    }

    let sync = SchemaSynchronizer::<ProfileRecord>::open(dirs.db_path(), TABLE).unwrap();
    let loaded = sync.load_all().unwrap();
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
fn legacy_table_gains_missing_columns() {
    let dirs = StoreDirs::new();
    {
        let conn = rusqlite::Connection::open(dirs.db_path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE profiles (id TEXT PRIMARY KEY NOT NULL, name TEXT, payload TEXT);",
        )
        .unwrap();
    }

    let mut sync = SchemaSynchronizer::<ProfileRecord>::open(dirs.db_path(), TABLE).unwrap();
    let columns = sync.columns().unwrap();
    for expected in ["variant", "is_default", "description", "last_updated"] {
        assert!(
            columns.iter().any(|c| c == expected),
            "missing column {expected}: {columns:?}"
        );
    }

    let profile = profile_with_settings("Migrated", 4).with_variant(Variant::Classic);
    sync.upsert_batch(std::slice::from_ref(&profile)).unwrap();
    let loaded = sync.load_all().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].variant(), Variant::Classic);
}

#[test]
fn optional_fields_cleared_on_update() {
    let dirs = StoreDirs::new();
    let mut sync = SchemaSynchronizer::<ProfileRecord>::open(dirs.db_path(), TABLE).unwrap();
    let mut profile = ProfileRecord::new("Default").with_description("first");
    sync.upsert_batch(std::slice::from_ref(&profile)).unwrap();

    profile.set_description(None);
    sync.upsert_batch(std::slice::from_ref(&profile)).unwrap();

    let loaded = sync.load_all().unwrap();
    assert_eq!(loaded[0].description(), None);
}

#[tokio::test]
async fn worker_persists_observed_changes() {
    let dirs = StoreDirs::new();
    let sync = Arc::new(Mutex::new(
        SchemaSynchronizer::<ProfileRecord>::open(dirs.db_path(), TABLE).unwrap(),
    ));
    let config = PersistenceConfig {
        batch_window_ms: 5,
        retry_delay_ms: 5,
        ..PersistenceConfig::default()
    };
    let worker = PersistenceWorker::spawn(Arc::clone(&sync), &config);
    let observer = worker.observer();

    let keep = ProfileRecord::new("keep");
    let gone = ProfileRecord::new("gone");
    observer.on_change(&ChangeEvent::added(keep.clone()));
    observer.on_change(&ChangeEvent::added(gone.clone()));
    observer.on_change(&ChangeEvent::removed(gone));
    worker.shutdown().await.unwrap();

    let loaded = sync.lock().unwrap().load_all().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id(), keep.id());
}
