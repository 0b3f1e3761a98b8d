//! Bounded profile cache with TTL expiry and LRU reclamation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{Result, StoreError};
use crate::events::{ChangeEvent, ChangeNotifier};
use crate::profile::{ProfileRecord, SettingValue};

/// A cached record with its expiry deadline and recency marker.
#[derive(Debug, Clone)]
struct CacheEntry {
    record: ProfileRecord,
    /// Fixed deadline measured from the last write.
    expires_at: Instant,
    /// Last read or write.
    last_access: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Lock-protected cache state.
///
/// The LRU map is unbounded; the entry cap is enforced by eviction passes so
/// that reclamation stays off the caller's path.
///
/// A profile dropped by expiry, reclamation, or `clear` still has its row in
/// storage, so its name stays reserved in `names` and is remembered in
/// `dormant` until the id is cached again.
struct CacheState {
    entries: LruCache<Uuid, CacheEntry>,
    /// Lowercased name → id, for case-insensitive uniqueness.
    names: HashMap<String, Uuid>,
    /// Uncached id → the name key it still holds.
    dormant: HashMap<Uuid, String>,
    /// Last sequence handed to a change event.
    sequence: u64,
}

impl CacheState {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Drop `id` and release its name.
    fn remove_entry(&mut self, id: &Uuid) -> Option<CacheEntry> {
        let entry = self.entries.pop(id)?;
        let key = entry.record.name_key();
        if self.names.get(&key) == Some(id) {
            self.names.remove(&key);
        }
        Some(entry)
    }

    /// Drop `id` from the cache but keep its name reserved.
    fn evict_entry(&mut self, id: &Uuid) -> Option<CacheEntry> {
        let entry = self.entries.pop(id)?;
        self.retain_name(*id, &entry);
        Some(entry)
    }

    fn retain_name(&mut self, id: Uuid, entry: &CacheEntry) {
        let key = entry.record.name_key();
        if self.names.get(&key) == Some(&id) {
            self.dormant.insert(id, key);
        }
    }

    /// Drop `id` if its entry has lapsed. Returns true if it was dropped.
    fn purge_if_expired(&mut self, id: &Uuid, now: Instant) -> bool {
        let expired = self.entries.peek(id).is_some_and(|e| e.is_expired(now));
        if expired {
            self.evict_entry(id);
        }
        expired
    }

    /// Id holding `name_key`, cached or not, other than `except`.
    fn name_owner(&self, name_key: &str, except: Uuid) -> Option<Uuid> {
        self.names
            .get(name_key)
            .copied()
            .filter(|owner| *owner != except)
    }

    fn insert(&mut self, record: ProfileRecord, expires_at: Instant, now: Instant) {
        let id = record.id();
        let old_key = match self.entries.peek(&id) {
            Some(old) => Some(old.record.name_key()),
            None => self.dormant.remove(&id),
        };
        if let Some(old_key) = old_key {
            if self.names.get(&old_key) == Some(&id) {
                self.names.remove(&old_key);
            }
        }
        self.names.insert(record.name_key(), id);
        self.entries.put(
            id,
            CacheEntry {
                record,
                expires_at,
                last_access: now,
            },
        );
    }
}

/// Result of one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    /// Entries dropped because their TTL lapsed.
    pub expired: usize,
    /// Entries dropped to bring the cache back under its cap.
    pub reclaimed: usize,
}

impl EvictionReport {
    pub const fn total(&self) -> usize {
        self.expired + self.reclaimed
    }
}

/// Counters for cache behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub reclaimed: u64,
    /// Uncached profiles whose names stay reserved.
    pub dormant: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    reclaimed: AtomicU64,
}

/// Thread-safe keyed store of profiles.
///
/// Every add, update, and remove raises exactly one change event after the
/// mutation is committed and the internal lock is released, so observers may
/// call back into the store. Eviction and `clear` raise no events.
pub struct CacheStore {
    state: Mutex<CacheState>,
    ttl: Duration,
    max_entries: usize,
    notifier: Arc<ChangeNotifier>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl CacheStore {
    /// Create a store with the given bounds, publishing to `notifier`.
    #[must_use]
    pub fn new(config: &CacheConfig, notifier: Arc<ChangeNotifier>) -> Self {
        Self::with_clock(config, notifier, Arc::new(SystemClock))
    }

    /// Create a store with an explicit time source.
    #[must_use]
    pub fn with_clock(
        config: &CacheConfig,
        notifier: Arc<ChangeNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        debug!(
            ttl_secs = config.ttl_secs,
            max_entries = config.max_entries,
            "Creating cache store"
        );
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                names: HashMap::new(),
                dormant: HashMap::new(),
                sequence: 0,
            }),
            ttl: config.ttl(),
            max_entries: config.max_entries.max(1),
            notifier,
            clock,
            counters: Counters::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The notifier this store publishes to.
    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Insert a new profile.
    ///
    /// Returns false if the record is invalid or another profile already
    /// uses the same name (case-insensitively). Re-adding an existing id is
    /// treated as an upsert and logged.
    #[instrument(skip(self, record), fields(id = %record.id(), name = %record.name()))]
    pub fn add(&self, record: ProfileRecord) -> bool {
        if let Err(e) = record.validate() {
            warn!(error = %e, "Rejected profile");
            return false;
        }

        let now = self.clock.now();
        let event = {
            let mut state = self.lock();
            let id = record.id();
            if let Some(owner) = state.name_owner(&record.name_key(), id) {
                warn!(existing = %owner, "Rejected profile: name already in use");
                return false;
            }

            state.purge_if_expired(&id, now);
            let existed = state.entries.contains(&id);
            if existed {
                warn!("Profile already cached, treating add as upsert");
            }
            state.insert(record.clone(), now + self.ttl, now);

            let event = if existed {
                ChangeEvent::updated(record)
            } else {
                ChangeEvent::added(record)
            };
            event.with_sequence(state.next_sequence())
        };

        debug!(kind = %event.kind, "Profile stored");
        self.notifier.notify(&event);
        true
    }

    /// Look up a profile. Expired entries are misses and are dropped.
    pub fn get(&self, id: Uuid) -> Option<ProfileRecord> {
        let now = self.clock.now();
        let mut state = self.lock();

        if state.purge_if_expired(&id, now) {
            trace!(%id, "Cache entry expired on read");
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match state.entries.get_mut(&id) {
            Some(entry) => {
                entry.last_access = now;
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.record.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Whether a live entry exists. Does not affect recency.
    pub fn contains(&self, id: Uuid) -> bool {
        let now = self.clock.now();
        self.lock()
            .entries
            .peek(&id)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Find a live profile by name, case-insensitively.
    pub fn find_by_name(&self, name: &str) -> Option<ProfileRecord> {
        let key = name.trim().to_lowercase();
        let id = *self.lock().names.get(&key)?;
        self.get(id)
    }

    /// Return the profile named `name`, creating an empty one on first touch.
    pub fn ensure(&self, name: &str) -> Result<ProfileRecord> {
        if let Some(existing) = self.find_by_name(name) {
            return Ok(existing);
        }
        let record = ProfileRecord::new(name.trim());
        record.validate()?;
        if self.add(record.clone()) {
            Ok(record)
        } else {
            // Lost a race with a concurrent add of the same name.
            self.find_by_name(name)
                .ok_or_else(|| StoreError::DuplicateName {
                    name: name.to_string(),
                })
        }
    }

    /// Delete a profile. Returns false if it was not cached.
    ///
    /// A lapsed entry that has not been swept yet is still deleted and
    /// reported, so the persisted row is removed with it.
    #[instrument(skip(self))]
    pub fn remove(&self, id: Uuid) -> bool {
        let removed = {
            let mut state = self.lock();
            state
                .remove_entry(&id)
                .map(|entry| ChangeEvent::removed(entry.record).with_sequence(state.next_sequence()))
        };
        match removed {
            Some(event) => {
                debug!("Profile removed");
                self.notifier.notify(&event);
                true
            }
            None => {
                trace!("Remove of absent profile ignored");
                false
            }
        }
    }

    /// Snapshot of all live profiles, most recently used first.
    pub fn get_all(&self) -> Vec<ProfileRecord> {
        let now = self.clock.now();
        self.lock()
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(_, e)| e.record.clone())
            .collect()
    }

    /// Insert or replace a profile, bumping its `last_updated`.
    ///
    /// Returns false if the record is invalid or its name collides with a
    /// different profile.
    #[instrument(skip(self, record), fields(id = %record.id(), name = %record.name()))]
    pub fn update(&self, mut record: ProfileRecord) -> bool {
        if let Err(e) = record.validate() {
            warn!(error = %e, "Rejected profile update");
            return false;
        }

        let now = self.clock.now();
        let event = {
            let mut state = self.lock();
            let id = record.id();
            if let Some(owner) = state.name_owner(&record.name_key(), id) {
                warn!(existing = %owner, "Rejected profile update: name already in use");
                return false;
            }

            state.purge_if_expired(&id, now);
            let existed = state.entries.contains(&id);
            record.touch();
            state.insert(record.clone(), now + self.ttl, now);

            let event = if existed {
                ChangeEvent::updated(record)
            } else {
                ChangeEvent::added(record)
            };
            event.with_sequence(state.next_sequence())
        };

        debug!(kind = %event.kind, "Profile updated");
        self.notifier.notify(&event);
        true
    }

    /// Remove every entry without per-entry events.
    ///
    /// Persisted rows are untouched, so the cleared names stay reserved.
    pub fn clear(&self) {
        let mut state = self.lock();
        let count = state.entries.len();
        while let Some((id, entry)) = state.entries.pop_lru() {
            state.retain_name(id, &entry);
        }
        info!(count, "Cache cleared");
    }

    /// Bulk-load records without events (startup warm-up).
    ///
    /// Invalid records and name collisions are skipped. Returns the number
    /// of records loaded.
    pub fn warm(&self, records: impl IntoIterator<Item = ProfileRecord>) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let mut loaded = 0;
        for record in records {
            if let Err(e) = record.validate() {
                warn!(id = %record.id(), error = %e, "Skipping invalid profile during warm-up");
                continue;
            }
            if let Some(owner) = state.name_owner(&record.name_key(), record.id()) {
                warn!(
                    id = %record.id(),
                    existing = %owner,
                    "Skipping profile with duplicate name during warm-up"
                );
                continue;
            }
            state.insert(record, now + self.ttl, now);
            loaded += 1;
        }
        info!(loaded, "Cache warmed");
        loaded
    }

    /// Apply `mutate` to a live record, refresh its TTL, and fire `updated`.
    fn modify<F>(&self, id: Uuid, mutate: F) -> Result<ProfileRecord>
    where
        F: FnOnce(&mut ProfileRecord) -> Result<()>,
    {
        let now = self.clock.now();
        let event = {
            let mut state = self.lock();
            if state.purge_if_expired(&id, now) {
                return Err(StoreError::ProfileNotFound { id });
            }
            let entry = state
                .entries
                .get_mut(&id)
                .ok_or(StoreError::ProfileNotFound { id })?;
            mutate(&mut entry.record)?;
            entry.expires_at = now + self.ttl;
            entry.last_access = now;
            let record = entry.record.clone();
            ChangeEvent::updated(record).with_sequence(state.next_sequence())
        };
        let record = event.record.clone();
        self.notifier.notify(&event);
        Ok(record)
    }

    /// Read `category.key` from a profile's settings.
    pub fn get_setting(
        &self,
        id: Uuid,
        category: &str,
        key: &str,
        default: Option<SettingValue>,
    ) -> Option<SettingValue> {
        match self.get(id) {
            Some(record) => record.get_setting(category, key, default),
            None => default,
        }
    }

    /// Write `category.key` on a profile and publish the update.
    pub fn set_setting(
        &self,
        id: Uuid,
        category: &str,
        key: &str,
        value: impl Into<SettingValue>,
    ) -> Result<ProfileRecord> {
        let value = value.into();
        self.modify(id, |record| {
            record.set_setting(category, key, value).map_err(|e| {
                warn!(%id, error = %e, "Rejected setting");
                StoreError::from(e)
            })
        })
    }

    /// Read an uncategorized setting.
    pub fn get_flat_setting(
        &self,
        id: Uuid,
        key: &str,
        default: Option<SettingValue>,
    ) -> Option<SettingValue> {
        match self.get(id) {
            Some(record) => record.get_flat_setting(key, default),
            None => default,
        }
    }

    /// Write an uncategorized setting and publish the update.
    pub fn set_flat_setting(
        &self,
        id: Uuid,
        key: &str,
        value: impl Into<SettingValue>,
    ) -> Result<ProfileRecord> {
        let value = value.into();
        self.modify(id, |record| {
            record.set_flat_setting(key, value).map_err(|e| {
                warn!(%id, error = %e, "Rejected setting");
                StoreError::from(e)
            })
        })
    }

    /// Remove a setting by full path and publish the update.
    pub fn remove_setting(&self, id: Uuid, key: &str) -> Result<Option<SettingValue>> {
        let mut previous = None;
        self.modify(id, |record| {
            previous = record.remove_setting(key);
            Ok(())
        })?;
        Ok(previous)
    }

    /// Number of entries currently held, including lapsed ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop lapsed entries, then reclaim least-recently-used entries until
    /// the cache is within its cap. Fires no change events; dropped
    /// profiles keep their names reserved.
    pub fn run_eviction_pass(&self) -> EvictionReport {
        let now = self.clock.now();
        let mut report = EvictionReport::default();
        {
            let mut state = self.lock();

            let lapsed: Vec<Uuid> = state
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(id, _)| *id)
                .collect();
            for id in &lapsed {
                state.evict_entry(id);
            }
            report.expired = lapsed.len();

            while state.entries.len() > self.max_entries {
                let Some((id, entry)) = state.entries.pop_lru() else {
                    break;
                };
                state.retain_name(id, &entry);
                trace!(%id, idle_ms = now.saturating_duration_since(entry.last_access).as_millis(), "Reclaimed LRU entry");
                report.reclaimed += 1;
            }
        }

        self.counters
            .expired
            .fetch_add(report.expired as u64, Ordering::Relaxed);
        self.counters
            .reclaimed
            .fetch_add(report.reclaimed as u64, Ordering::Relaxed);
        if report.total() > 0 {
            debug!(
                expired = report.expired,
                reclaimed = report.reclaimed,
                "Eviction pass complete"
            );
        }
        report
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            max_entries: self.max_entries,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            reclaimed: self.counters.reclaimed.load(Ordering::Relaxed),
            dormant: self.lock().dormant.len(),
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.len())
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}
