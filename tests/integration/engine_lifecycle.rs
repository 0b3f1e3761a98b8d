//! Engine startup, write-behind, and restart.

use std::sync::PoisonError;

use pstore::Engine;
use pstore::backup::BackupFormat;
use pstore::config::StoreConfig;
use pstore::profile::{ProfileRecord, SettingValue, Variant};

use crate::common::fixtures::StoreDirs;

#[tokio::test]
async fn changes_survive_restart() {
    crate::common::init_test_logging();
    let dirs = StoreDirs::new();

    let engine = Engine::start(dirs.config()).await.unwrap();
    let profile = ProfileRecord::new("Default");
    let id = profile.id();
    assert!(engine.store().add(profile));
    engine
        .store()
        .set_setting(id, "prayerSettings", "boneHandler", "Bank")
        .unwrap();
    engine.flush().await.unwrap();
    assert!(engine.persistence_stats().rows_written >= 1);
    engine.shutdown().await.unwrap();

    let engine = Engine::start(dirs.config()).await.unwrap();
    assert_eq!(
        engine
            .store()
            .get_setting(id, "prayerSettings", "boneHandler", None),
        Some(SettingValue::from("Bank"))
    );
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn removals_are_persisted() {
    let dirs = StoreDirs::new();

    let engine = Engine::start(dirs.config()).await.unwrap();
    let keep = ProfileRecord::new("keep");
    let drop = ProfileRecord::new("drop");
    let drop_id = drop.id();
    engine.store().add(keep);
    engine.store().add(drop);
    engine.flush().await.unwrap();
    assert!(engine.store().remove(drop_id));
    engine.shutdown().await.unwrap();

    let engine = Engine::start(dirs.config()).await.unwrap();
    assert_eq!(engine.store().len(), 1);
    assert!(engine.store().find_by_name("keep").is_some());
    let rows = engine
        .synchronizer()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .count()
        .unwrap();
    assert_eq!(rows, 1);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn in_memory_engine_backs_up_to_disk() {
    let dirs = StoreDirs::new();
    let engine = Engine::start_in_memory(dirs.config()).await.unwrap();

    engine
        .store()
        .add(ProfileRecord::new("Classic").with_variant(Variant::Classic));
    let path = engine
        .backups()
        .snapshot(engine.store(), BackupFormat::Json, Variant::Classic)
        .unwrap();
    assert!(path.starts_with(dirs.backup_dir()));
    assert!(path.exists());
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn invalid_config_fails_startup() {
    let mut config = StoreConfig::default();
    config.cache.max_entries = 0;
    assert!(Engine::start_in_memory(config).await.is_err());
}

#[tokio::test]
async fn unopenable_database_is_a_startup_error() {
    let dirs = StoreDirs::new();
    // A directory where the database file should be.
    std::fs::create_dir_all(dirs.db_path()).unwrap();
    let err = Engine::start(dirs.config()).await.unwrap_err();
    assert!(
        matches!(err, pstore::StoreError::Startup(_)),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn evicted_profile_keeps_its_name() {
    let dirs = StoreDirs::new();
    let mut config = dirs.config();
    config.cache.max_entries = 1;

    let engine = Engine::start(config).await.unwrap();
    assert!(engine.store().add(ProfileRecord::new("Main")));
    assert!(engine.store().add(ProfileRecord::new("Other")));
    let report = engine.store().run_eviction_pass();
    assert_eq!(report.reclaimed, 1);
    assert!(engine.store().find_by_name("main").is_none());

    assert!(!engine.store().add(ProfileRecord::new("main")));
    engine.flush().await.unwrap();

    let rows = engine
        .synchronizer()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .load_all()
        .unwrap();
    let mains = rows
        .iter()
        .filter(|p| p.name().eq_ignore_ascii_case("main"))
        .count();
    assert_eq!(mains, 1);
    assert_eq!(rows.len(), 2);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn non_finite_setting_leaves_profile_intact() {
    let dirs = StoreDirs::new();

    let engine = Engine::start(dirs.config()).await.unwrap();
    let profile = ProfileRecord::new("Default").with_variant(Variant::Classic);
    let id = profile.id();
    assert!(engine.store().add(profile));
    engine
        .store()
        .set_setting(id, "combat", "ratio", 0.5)
        .unwrap();
    assert!(
        engine
            .store()
            .set_setting(id, "combat", "ratio", f64::NAN)
            .is_err()
    );
    assert!(
        engine
            .store()
            .set_flat_setting(id, "scale", f64::INFINITY)
            .is_err()
    );
    engine
        .backups()
        .snapshot(engine.store(), BackupFormat::Json, Variant::Classic)
        .unwrap();
    engine.flush().await.unwrap();
    engine.shutdown().await.unwrap();

    let engine = Engine::start(dirs.config()).await.unwrap();
    assert_eq!(
        engine.store().get_setting(id, "combat", "ratio", None),
        Some(SettingValue::Float(0.5))
    );
    let restored = engine.backups().load(BackupFormat::Json, Variant::Classic);
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].settings().len(), 1);
    engine.shutdown().await.unwrap();
}
