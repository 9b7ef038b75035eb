//! The action store handle: connection lifecycle, the producer queue and the
//! writer thread that drains it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use blocklog_codec::StateCodec;
use blocklog_common::ActionRecord;
use blocklog_kernel::ActionSink;
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use serde::Serialize;

use crate::config::StoreConfig;
use crate::schema::init_schema;
use crate::writer::{self, WriterMsg};

/// Errors from opening or writing to the action store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("schema version mismatch: database has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: i64,
        expected_version: i64,
    },
    #[error("corrupt stored row: {0}")]
    Corrupt(String),
    #[error("action store is unavailable")]
    Unavailable,
    #[error("failed to start writer thread: {0}")]
    Spawn(String),
}

/// Counters since the store was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Records accepted by the queue.
    pub enqueued: u64,
    /// Records written synchronously because the queue was full.
    pub sync_fallbacks: u64,
    /// Records committed by the writer thread.
    pub committed: u64,
    /// Writer transactions committed; each holds at most `batch_size` records.
    pub batches: u64,
    /// Records lost to failed batches or offered after close.
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub enqueued: AtomicU64,
    pub sync_fallbacks: AtomicU64,
    pub committed: AtomicU64,
    pub batches: AtomicU64,
    pub dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StoreStats {
        StoreStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            sync_fallbacks: self.sync_fallbacks.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// State shared with the writer thread. `None` connection means the store is
/// unavailable (never opened, or closed).
pub(crate) struct Shared {
    pub conn: Mutex<Option<Connection>>,
    pub counters: Counters,
}

struct Inner {
    config: StoreConfig,
    codec: StateCodec,
    shared: Arc<Shared>,
    sender: RwLock<Option<Sender<WriterMsg>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

/// Durable log of world mutations backed by a single SQLite connection.
///
/// Cloning is cheap; every clone talks to the same connection and writer.
/// Producers call [`ActionStore::log_action`], which never blocks except
/// when the queue is full. One writer thread commits queued records in batches.
#[derive(Clone)]
pub struct ActionStore {
    inner: Arc<Inner>,
}

impl ActionStore {
    /// Open (or create) the database, apply the schema and start the writer.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let conn = if config.is_in_memory() {
            Connection::open_in_memory()?
        } else {
            if let Some(dir) = config.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let conn = Connection::open(&config.path)?;
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            tracing::debug!(%mode, "journal mode set");
            conn
        };
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        init_schema(&conn)?;

        let shared = Arc::new(Shared {
            conn: Mutex::new(Some(conn)),
            counters: Counters::default(),
        });
        let (tx, rx) = crossbeam_channel::bounded(config.queue_capacity);
        let batch_size = config.batch_size;
        let writer_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("blocklog-writer".into())
            .spawn(move || writer::run(&writer_shared, &rx, batch_size))
            .map_err(|e| StoreError::Spawn(e.to_string()))?;

        tracing::info!(
            path = %config.path.display(),
            queue_capacity = config.queue_capacity,
            batch_size,
            "action store opened"
        );
        Ok(Self::from_parts(config, shared, Some(tx), Some(handle)))
    }

    /// Open the store, or fall back to an unavailable one whose writes are
    /// ignored and whose reads come back empty.
    pub fn open_or_unavailable(config: StoreConfig) -> Self {
        match Self::open(config.clone()) {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(path = %config.path.display(), "action store unavailable: {e}");
                Self::unavailable(config)
            }
        }
    }

    /// A store with no connection.
    pub fn unavailable(config: StoreConfig) -> Self {
        let shared = Arc::new(Shared {
            conn: Mutex::new(None),
            counters: Counters::default(),
        });
        Self::from_parts(config, shared, None, None)
    }

    fn from_parts(
        config: StoreConfig,
        shared: Arc<Shared>,
        sender: Option<Sender<WriterMsg>>,
        writer: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                codec: StateCodec::new(),
                shared,
                sender: RwLock::new(sender),
                writer: Mutex::new(writer),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub(crate) fn codec(&self) -> &StateCodec {
        &self.inner.codec
    }

    pub fn is_available(&self) -> bool {
        self.inner.shared.conn.lock().is_some()
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.shared.counters.snapshot()
    }

    /// Queue a record for the writer thread. Never fails.
    ///
    /// When the queue is full the record is written synchronously under the
    /// connection lock instead.
    pub fn log_action(&self, record: ActionRecord) {
        let counters = &self.inner.shared.counters;
        let sender = self.inner.sender.read();
        let Some(tx) = sender.as_ref() else {
            tracing::debug!(kind = %record.kind, "action store not accepting records");
            Counters::add(&counters.dropped, 1);
            return;
        };
        match tx.try_send(WriterMsg::Record(record)) {
            Ok(()) => Counters::add(&counters.enqueued, 1),
            Err(TrySendError::Full(msg)) => {
                tracing::warn!(
                    capacity = self.inner.config.queue_capacity,
                    "action queue full, writing synchronously"
                );
                if let WriterMsg::Record(record) = msg {
                    self.write_now(record);
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::error!("writer thread is gone, record dropped");
                Counters::add(&counters.dropped, 1);
            }
        }
    }

    fn write_now(&self, record: ActionRecord) {
        let counters = &self.inner.shared.counters;
        let mut conn = self.inner.shared.conn.lock();
        let Some(conn) = conn.as_mut() else {
            Counters::add(&counters.dropped, 1);
            return;
        };
        match writer::commit_batch(conn, std::slice::from_ref(&record)) {
            Ok(()) => Counters::add(&counters.sync_fallbacks, 1),
            Err(e) => {
                tracing::error!(kind = %record.kind, "synchronous write failed: {e}");
                Counters::add(&counters.dropped, 1);
            }
        }
    }

    /// Block until every record queued before this call is committed.
    pub fn flush(&self) {
        let tx = match self.inner.sender.read().as_ref() {
            Some(tx) => tx.clone(),
            None => return,
        };
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if tx.send(WriterMsg::Flush(ack_tx)).is_err() {
            return;
        }
        drop(tx);
        if ack_rx.recv().is_err() {
            tracing::warn!("writer exited before acknowledging flush");
        }
    }

    /// Stop accepting records, drain the queue, join the writer and release
    /// the connection. Safe to call more than once, from any clone.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Run `f` against the connection; unavailable stores and SQL errors yield
    /// the default value.
    pub(crate) fn read<T: Default>(
        &self,
        op: &str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> T {
        let conn = self.inner.shared.conn.lock();
        let Some(conn) = conn.as_ref() else {
            return T::default();
        };
        f(conn).unwrap_or_else(|e| {
            tracing::warn!(op, "query failed: {e}");
            T::default()
        })
    }

    /// Run `f` against the connection, surfacing errors.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.inner.shared.conn.lock();
        let conn = conn.as_mut().ok_or(StoreError::Unavailable)?;
        f(conn)
    }
}

impl Inner {
    fn close(&self) {
        let Some(tx) = self.sender.write().take() else {
            return;
        };
        drop(tx);
        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                tracing::error!("writer thread panicked");
            }
        }
        self.shared.conn.lock().take();
        let stats = self.shared.counters.snapshot();
        tracing::info!(
            committed = stats.committed,
            batches = stats.batches,
            sync_fallbacks = stats.sync_fallbacks,
            dropped = stats.dropped,
            "action store closed"
        );
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ActionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionStore")
            .field("path", &self.inner.config.path)
            .field("available", &self.is_available())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ActionSink for ActionStore {
    fn log_action(&self, record: ActionRecord) {
        ActionStore::log_action(self, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::record;

    #[test]
    fn open_in_memory() {
        let store = ActionStore::open(StoreConfig::in_memory()).unwrap();
        assert!(store.is_available());
        assert_eq!(store.stats(), StoreStats::default());
    }

    #[test]
    fn open_rejects_bad_config() {
        let config = StoreConfig {
            batch_size: 0,
            ..StoreConfig::in_memory()
        };
        assert!(matches!(ActionStore::open(config), Err(StoreError::Config(_))));
    }

    #[test]
    fn logged_records_are_committed_on_flush() {
        let store = ActionStore::open(StoreConfig::in_memory()).unwrap();
        for i in 0..10 {
            store.log_action(record(1000 + i, i as i32));
        }
        store.flush();
        assert_eq!(store.record_count(), 10);
        let stats = store.stats();
        assert_eq!(stats.enqueued, 10);
        assert_eq!(stats.committed, 10);
    }

    #[test]
    fn queue_overflow_loses_nothing() {
        let config = StoreConfig {
            queue_capacity: 4,
            batch_size: 2,
            ..StoreConfig::in_memory()
        };
        let store = ActionStore::open(config).unwrap();
        for i in 0..500 {
            store.log_action(record(1000, i));
        }
        store.flush();
        assert_eq!(store.record_count(), 500);
        let stats = store.stats();
        assert_eq!(stats.enqueued + stats.sync_fallbacks, 500);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn concurrent_producers() {
        let store = ActionStore::open(StoreConfig::in_memory()).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        store.log_action(record(1000 + i, t));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        store.flush();
        assert_eq!(store.record_count(), 1000);
    }

    #[test]
    fn close_drains_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::at(dir.path().join("log.db"));
        let store = ActionStore::open(config.clone()).unwrap();
        for i in 0..50 {
            store.log_action(record(1000, i));
        }
        store.close();
        store.close();
        assert!(!store.is_available());
        assert_eq!(store.record_count(), 0);

        store.log_action(record(2000, 0));
        assert_eq!(store.stats().dropped, 1);

        let reopened = ActionStore::open(config).unwrap();
        assert_eq!(reopened.record_count(), 50);
    }

    #[test]
    fn unavailable_store_is_inert() {
        let store = ActionStore::unavailable(StoreConfig::in_memory());
        store.log_action(record(1000, 0));
        store.flush();
        store.close();
        assert!(!store.is_available());
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn open_or_unavailable_degrades() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let store = ActionStore::open_or_unavailable(StoreConfig::at(dir.path()));
        assert!(!store.is_available());
    }

    #[test]
    fn usable_as_action_sink() {
        let store = ActionStore::open(StoreConfig::in_memory()).unwrap();
        let sink: Arc<dyn ActionSink> = Arc::new(store.clone());
        sink.log_action(record(1000, 0));
        store.flush();
        assert_eq!(store.record_count(), 1);
    }
}
