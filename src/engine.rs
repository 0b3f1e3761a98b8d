//! Wiring of the cache, persistence, and backup components.
//!
//! An [`Engine`] is built once at startup and its handles are passed to
//! whatever needs them; there is no process-wide store.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, instrument, warn};

use crate::backup::BackupCoordinator;
use crate::cache::{CacheStore, HousekeeperHandle, spawn_housekeeper};
use crate::config::{self, StoreConfig};
use crate::error::{Result, StoreError};
use crate::events::{ChangeNotifier, ObserverId};
use crate::persist::{PersistenceStats, PersistenceWorker, SchemaSynchronizer, SharedSynchronizer};
use crate::profile::ProfileRecord;

/// Running store with background persistence and housekeeping.
#[derive(Debug)]
pub struct Engine {
    config: StoreConfig,
    store: Arc<CacheStore>,
    notifier: Arc<ChangeNotifier>,
    sync: SharedSynchronizer,
    worker: PersistenceWorker,
    persistence_observer: ObserverId,
    housekeeper: HousekeeperHandle,
    backups: BackupCoordinator,
}

impl Engine {
    /// Open the configured database and start the engine.
    ///
    /// Must run inside a tokio runtime. Failing to open or read the database
    /// is a startup error.
    #[instrument(skip_all)]
    pub async fn start(config: StoreConfig) -> Result<Self> {
        let db_path = config::database_path(&config)?;
        let table = config.storage.table.clone();
        let sync = tokio::task::spawn_blocking(move || {
            SchemaSynchronizer::<ProfileRecord>::open(&db_path, &table)
        })
        .await
        .map_err(|e| StoreError::Startup(format!("database task failed: {e}")))?
        .map_err(|e| match e {
            StoreError::Startup(_) => e,
            other => StoreError::Startup(format!("failed to prepare database: {other}")),
        })?;
        Self::with_synchronizer(config, sync).await
    }

    /// Start against an in-memory database.
    pub async fn start_in_memory(config: StoreConfig) -> Result<Self> {
        let sync = SchemaSynchronizer::<ProfileRecord>::in_memory(&config.storage.table)?;
        Self::with_synchronizer(config, sync).await
    }

    /// Start with an already opened synchronizer.
    pub async fn with_synchronizer(
        config: StoreConfig,
        sync: SchemaSynchronizer<ProfileRecord>,
    ) -> Result<Self> {
        config.validate()?;
        let sync: SharedSynchronizer = Arc::new(Mutex::new(sync));

        let loader = Arc::clone(&sync);
        let persisted = tokio::task::spawn_blocking(move || {
            loader
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .load_all()
        })
        .await
        .map_err(|e| StoreError::Startup(format!("database task failed: {e}")))?
        .map_err(|e| StoreError::Startup(format!("failed to read profiles: {e}")))?;

        let notifier = Arc::new(ChangeNotifier::new());
        let store = Arc::new(CacheStore::new(&config.cache, Arc::clone(&notifier)));
        let total = persisted.len();
        let loaded = store.warm(persisted);
        if loaded < total {
            warn!(skipped = total - loaded, "Some stored profiles were not loaded");
        }

        let worker = PersistenceWorker::spawn(Arc::clone(&sync), &config.persistence);
        let persistence_observer = notifier.register(worker.observer());
        let housekeeper = spawn_housekeeper(&store, config.cache.sweep_interval());
        let backups = BackupCoordinator::new(config::backup_dir(&config)?);

        info!(profiles = loaded, "Engine started");
        Ok(Self {
            config,
            store,
            notifier,
            sync,
            worker,
            persistence_observer,
            housekeeper,
            backups,
        })
    }

    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Handle to the live cache.
    pub const fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Notifier for registering additional observers.
    pub const fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub const fn backups(&self) -> &BackupCoordinator {
        &self.backups
    }

    /// Shared synchronizer, for direct queries against the database.
    pub const fn synchronizer(&self) -> &SharedSynchronizer {
        &self.sync
    }

    pub fn persistence_stats(&self) -> PersistenceStats {
        self.worker.stats()
    }

    /// Wait until every change so far has been written.
    pub async fn flush(&self) -> Result<()> {
        self.worker.flush().await
    }

    /// Flush pending writes and stop background tasks.
    #[instrument(skip_all)]
    pub async fn shutdown(self) -> Result<()> {
        self.notifier.unregister(self.persistence_observer);
        self.housekeeper.shutdown().await;
        let result = self.worker.shutdown().await;
        match &result {
            Ok(()) => info!("Engine stopped"),
            Err(e) => warn!(error = %e, "Engine stopped with unsaved changes"),
        }
        result
    }
}
