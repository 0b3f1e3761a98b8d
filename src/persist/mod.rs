//! Relational persistence for profiles.
//!
//! [`SchemaSynchronizer`] owns the SQLite table and migrates it from the
//! record's declared [`TableSchema`]. [`PersistenceWorker`] feeds it from
//! cache change events.

mod schema;
mod sync;
mod worker;

pub use schema::{
    FieldDescriptor, FieldMap, FieldValue, Persistable, StorageType, TableSchema, column_name,
};
pub use sync::SchemaSynchronizer;
pub use worker::{PersistenceObserver, PersistenceStats, PersistenceWorker, SharedSynchronizer};
