//! In-memory profile cache.
//!
//! [`CacheStore`] holds profiles keyed by id with a per-entry TTL measured
//! from the last write and a least-recently-used cap. Reads check expiry
//! lazily; sweeping and reclamation run from [`spawn_housekeeper`] or an
//! explicit [`CacheStore::run_eviction_pass`].

mod clock;
mod housekeeping;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use housekeeping::{HousekeeperHandle, spawn_housekeeper};
pub use store::{CacheStats, CacheStore, EvictionReport};
