//! Background write-behind from the cache to the database.
//!
//! The worker listens for change events, coalesces them per profile over a
//! short window, and writes each batch through [`SchemaSynchronizer`] on the
//! blocking pool. A failed batch is retried whole.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::sync::SchemaSynchronizer;
use crate::config::PersistenceConfig;
use crate::error::{Result, StoreError};
use crate::events::{ChangeEvent, ChangeKind, ChangeObserver};
use crate::profile::ProfileRecord;

/// Shared handle to the synchronizer used by the worker and the engine.
pub type SharedSynchronizer = Arc<Mutex<SchemaSynchronizer<ProfileRecord>>>;

enum Command {
    Change(ChangeEvent),
    Flush(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<Result<()>>),
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Upsert(ProfileRecord),
    Delete,
}

/// Counters for persistence activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceStats {
    pub batches_written: u64,
    pub rows_written: u64,
    pub rows_deleted: u64,
    pub failed_attempts: u64,
    pub dropped_batches: u64,
}

#[derive(Debug, Default)]
struct Counters {
    batches_written: AtomicU64,
    rows_written: AtomicU64,
    rows_deleted: AtomicU64,
    failed_attempts: AtomicU64,
    dropped_batches: AtomicU64,
}

/// Change observer that forwards events to the worker.
#[derive(Debug, Clone)]
pub struct PersistenceObserver {
    tx: mpsc::UnboundedSender<Command>,
}

impl ChangeObserver for PersistenceObserver {
    fn on_change(&self, event: &ChangeEvent) {
        if self.tx.send(Command::Change(event.clone())).is_err() {
            warn!(id = %event.record.id(), "Persistence worker stopped, change not persisted");
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Change(e) => write!(f, "Change({}, {})", e.kind, e.record.id()),
            Self::Flush(_) => f.write_str("Flush"),
            Self::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

/// Handle to the running persistence task.
#[derive(Debug)]
pub struct PersistenceWorker {
    tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl PersistenceWorker {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(sync: SharedSynchronizer, config: &PersistenceConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let state = WorkerState {
            sync,
            rx,
            pending: BTreeMap::new(),
            latest: HashMap::new(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            batch_window: config.batch_window(),
            counters: Arc::clone(&counters),
        };
        let task = tokio::spawn(state.run());
        info!(
            max_retries = config.max_retries,
            batch_window_ms = config.batch_window_ms,
            "Persistence worker started"
        );
        Self { tx, task, counters }
    }

    /// Observer to register with the store's notifier.
    pub fn observer(&self) -> Arc<PersistenceObserver> {
        Arc::new(PersistenceObserver {
            tx: self.tx.clone(),
        })
    }

    /// Write everything queued so far and wait for the result.
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(reply))
            .map_err(|_| StoreError::Other("persistence worker stopped".to_string()))?;
        rx.await
            .map_err(|_| StoreError::Other("persistence worker stopped".to_string()))?
    }

    /// Flush pending writes and stop the task.
    pub async fn shutdown(self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(reply)).is_err() {
            return Err(StoreError::Other("persistence worker already stopped".to_string()));
        }
        let result = rx
            .await
            .map_err(|_| StoreError::Other("persistence worker stopped".to_string()))?;
        if let Err(e) = self.task.await {
            error!(error = %e, "Persistence worker task failed");
        }
        result
    }

    pub fn stats(&self) -> PersistenceStats {
        PersistenceStats {
            batches_written: self.counters.batches_written.load(Ordering::Relaxed),
            rows_written: self.counters.rows_written.load(Ordering::Relaxed),
            rows_deleted: self.counters.rows_deleted.load(Ordering::Relaxed),
            failed_attempts: self.counters.failed_attempts.load(Ordering::Relaxed),
            dropped_batches: self.counters.dropped_batches.load(Ordering::Relaxed),
        }
    }
}

struct WorkerState {
    sync: SharedSynchronizer,
    rx: mpsc::UnboundedReceiver<Command>,
    /// Latest pending write per profile.
    pending: BTreeMap<Uuid, PendingWrite>,
    /// Highest event sequence accepted per profile.
    latest: HashMap<Uuid, u64>,
    max_retries: u32,
    retry_delay: Duration,
    batch_window: Duration,
    counters: Arc<Counters>,
}

impl WorkerState {
    fn queue(&mut self, event: ChangeEvent) {
        let id = event.record.id();
        let latest = self.latest.entry(id).or_default();
        if event.sequence < *latest {
            debug!(
                %id,
                sequence = event.sequence,
                latest = *latest,
                "Ignoring change older than one already queued"
            );
            return;
        }
        *latest = event.sequence;
        trace!(%id, kind = %event.kind, sequence = event.sequence, "Queued change");
        let write = match event.kind {
            ChangeKind::Added | ChangeKind::Updated => PendingWrite::Upsert(event.record),
            ChangeKind::Removed => PendingWrite::Delete,
        };
        self.pending.insert(id, write);
    }

    async fn run(mut self) {
        loop {
            let Some(first) = self.rx.recv().await else {
                let _ = self.write_pending().await;
                break;
            };

            let mut waiters = Vec::new();
            let mut stop = None;
            match first {
                Command::Change(event) => {
                    self.queue(event);
                    // Coalesce further changes until the window closes or
                    // someone asks for the writes.
                    let window = tokio::time::sleep(self.batch_window);
                    tokio::pin!(window);
                    loop {
                        tokio::select! {
                            () = &mut window => break,
                            cmd = self.rx.recv() => match cmd {
                                Some(Command::Change(event)) => self.queue(event),
                                Some(Command::Flush(reply)) => {
                                    waiters.push(reply);
                                    break;
                                }
                                Some(Command::Shutdown(reply)) => {
                                    stop = Some(reply);
                                    break;
                                }
                                None => break,
                            },
                        }
                    }
                }
                Command::Flush(reply) => waiters.push(reply),
                Command::Shutdown(reply) => stop = Some(reply),
            }

            let outcome = self.write_pending().await;
            for waiter in waiters {
                let _ = waiter.send(outcome.clone().map_err(StoreError::Other));
            }
            if let Some(reply) = stop {
                let _ = reply.send(outcome.map_err(StoreError::Other));
                break;
            }
        }
        info!("Persistence worker stopped");
    }

    /// Write the pending batch, retrying the whole batch on failure.
    async fn write_pending(&mut self) -> std::result::Result<(), String> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.pending);
        let mut upserts = Vec::new();
        let mut deletes = Vec::new();
        for (id, write) in batch {
            match write {
                PendingWrite::Upsert(record) => upserts.push(record),
                PendingWrite::Delete => deletes.push(id),
            }
        }
        let upserts = Arc::new(upserts);
        let deletes = Arc::new(deletes);

        let mut attempt = 0;
        loop {
            let sync = Arc::clone(&self.sync);
            let up = Arc::clone(&upserts);
            let del = Arc::clone(&deletes);
            let result = tokio::task::spawn_blocking(move || {
                let mut sync = sync.lock().unwrap_or_else(PoisonError::into_inner);
                let written = sync.upsert_batch(&up)?;
                let removed = sync.delete(&del)?;
                Ok::<_, StoreError>((written, removed))
            })
            .await
            .map_err(|e| StoreError::Other(format!("persistence task panicked: {e}")))
            .and_then(|r| r);

            match result {
                Ok((written, removed)) => {
                    self.counters.batches_written.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .rows_written
                        .fetch_add(written as u64, Ordering::Relaxed);
                    self.counters
                        .rows_deleted
                        .fetch_add(removed as u64, Ordering::Relaxed);
                    debug!(written, removed, attempt, "Persisted batch");
                    return Ok(());
                }
                Err(e) => {
                    self.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    if attempt >= self.max_retries {
                        self.counters.dropped_batches.fetch_add(1, Ordering::Relaxed);
                        error!(
                            error = %e,
                            attempts = attempt + 1,
                            upserts = upserts.len(),
                            deletes = deletes.len(),
                            "Giving up on batch"
                        );
                        return Err(e.to_string());
                    }
                    attempt += 1;
                    warn!(error = %e, attempt, "Batch write failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}
