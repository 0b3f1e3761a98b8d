//! Profile store library: a settings cache with relational persistence and
//! file backups.
//!
//! This library exposes the engine behind the `pstore` CLI so it can be
//! embedded by other applications and exercised by tests.
//!
//! # Modules
//!
//! - `profile`: Profile records, setting values, and the dotted-path codec
//! - `cache`: TTL and LRU bounded in-memory store
//! - `events`: Change notification for store mutations
//! - `persist`: Self-migrating SQLite table and write-behind worker
//! - `backup`: JSON and YAML collection backups
//! - `engine`: Startup wiring of the components above
//! - `config`: Configuration file handling
//! - `error`: Error types with user-recoverable hints
#![forbid(unsafe_code)]

pub mod backup;
pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod persist;
pub mod profile;

pub use engine::Engine;
pub use error::{Result, StoreError};
