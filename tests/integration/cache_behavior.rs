//! Cache store behavior observed through its public API and change events.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pstore::cache::{CacheStore, ManualClock};
use pstore::config::CacheConfig;
use pstore::events::{ChangeKind, ChangeNotifier};
use pstore::profile::{ProfileRecord, SettingValue};

use crate::common::fixtures::profile_with_settings;

fn store_with(max_entries: usize, ttl_secs: u64) -> (CacheStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let config = CacheConfig {
        ttl_secs,
        max_entries,
        ..CacheConfig::default()
    };
    let store = CacheStore::with_clock(&config, Arc::new(ChangeNotifier::new()), clock.clone());
    (store, clock)
}

fn record_events(store: &CacheStore) -> Arc<Mutex<Vec<(ChangeKind, String)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store.notifier().subscribe(move |event| {
        sink.lock()
            .unwrap()
            .push((event.kind, event.record.name().to_string()));
    });
    seen
}

#[test]
fn events_follow_mutations_in_order() {
    let (store, _clock) = store_with(10, 60);
    let seen = record_events(&store);

    let profile = ProfileRecord::new("Default");
    let id = profile.id();
    assert!(store.add(profile));
    store
        .set_setting(id, "prayerSettings", "boneHandler", "Bank")
        .unwrap();
    assert!(store.remove(id));

    let kinds: Vec<ChangeKind> = seen.lock().unwrap().iter().map(|(k, _)| *k).collect();
    assert_eq!(
        kinds,
        vec![ChangeKind::Added, ChangeKind::Updated, ChangeKind::Removed]
    );
}

#[test]
fn settings_read_back_through_the_store() {
    let (store, _clock) = store_with(10, 60);
    let profile = ProfileRecord::new("Default");
    let id = profile.id();
    store.add(profile);

    store
        .set_setting(id, "prayerSettings", "boneHandler", "Bank")
        .unwrap();
    assert_eq!(
        store.get_setting(id, "prayerSettings", "boneHandler", None),
        Some(SettingValue::from("Bank"))
    );
    assert_eq!(
        store.get_flat_setting(id, "prayerSettings.boneHandler", None),
        Some(SettingValue::from("Bank"))
    );
}

#[test]
fn names_are_unique_case_insensitively() {
    let (store, _clock) = store_with(10, 60);
    assert!(store.add(ProfileRecord::new("Default")));
    assert!(!store.add(ProfileRecord::new("DEFAULT")));
    assert_eq!(store.len(), 1);
    assert!(store.find_by_name("default").is_some());
}

#[test]
fn capacity_is_enforced_by_eviction() {
    let (store, _clock) = store_with(5, 3600);
    let ids: Vec<_> = (0..8)
        .map(|i| {
            let profile = profile_with_settings(&format!("p{i}"), 2);
            let id = profile.id();
            store.add(profile);
            id
        })
        .collect();

    // Touch the oldest so it counts as recently used.
    assert!(store.get(ids[0]).is_some());

    let report = store.run_eviction_pass();
    assert_eq!(report.reclaimed, 3);
    assert_eq!(store.len(), 5);
    assert!(store.contains(ids[0]));
    assert!(!store.contains(ids[1]));
}

#[test]
fn expired_entries_read_as_absent() {
    let (store, clock) = store_with(10, 30);
    let profile = ProfileRecord::new("Default");
    let id = profile.id();
    store.add(profile);

    clock.advance(Duration::from_secs(29));
    assert!(store.get(id).is_some());

    clock.advance(Duration::from_secs(2));
    assert!(store.get(id).is_none());
    assert!(store.find_by_name("Default").is_none());
}

#[test]
fn eviction_does_not_publish_events() {
    let (store, clock) = store_with(10, 30);
    store.add(ProfileRecord::new("a"));
    store.add(ProfileRecord::new("b"));
    let seen = record_events(&store);

    clock.advance(Duration::from_secs(31));
    let report = store.run_eviction_pass();
    assert_eq!(report.expired, 2);
    assert!(store.is_empty());
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn concurrent_writers_stay_consistent() {
    let (store, _clock) = store_with(100, 3600);
    let store = Arc::new(store);
    let profile = ProfileRecord::new("shared");
    let id = profile.id();
    store.add(profile);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..25 {
                    store
                        .set_setting(id, &format!("thread{t}"), &format!("key{i}"), i64::from(i))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let record = store.get(id).unwrap();
    assert_eq!(record.settings().len(), 8 * 25);
}
