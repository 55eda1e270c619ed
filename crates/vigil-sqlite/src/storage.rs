//! SQLite storage adapter: the single write connection, the writer's
//! exclusive lock, and the mutation hook feeding the change collector.

use crate::resolver;
use crate::txn::WriteTransaction;
use parking_lot::{Mutex, RwLock};
use rusqlite::hooks::Action;
use rusqlite::{Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use vigil_core::{
    ChangeCollector, ChangeSet, CommitSink, MutationEvent, MutationKind, Result, StorageConfig,
    TableRegistry, VigilError,
};

/// Owns the write path: one write connection behind the writer's exclusive
/// lock (single-writer assumption), with the update hook forwarding every
/// tracked mutation into the collector.
pub struct Storage {
    conn: Mutex<Connection>,
    collector: Arc<ChangeCollector>,
    registry: Arc<TableRegistry>,
    config: StorageConfig,
    path: PathBuf,
    sink: RwLock<Option<Arc<dyn CommitSink>>>,
    migrating: Arc<AtomicBool>,
}

impl Storage {
    /// Open (or create) the store and install the mutation hook.
    pub fn open(
        path: impl AsRef<Path>,
        registry: TableRegistry,
        config: StorageConfig,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn =
            Connection::open(&path).map_err(|e| VigilError::Storage(e.to_string()))?;
        configure_connection(&conn, &config)?;

        let registry = Arc::new(registry);
        let collector = Arc::new(ChangeCollector::new(registry.clone()));

        let hook_collector = collector.clone();
        conn.update_hook(Some(
            move |action: Action, _db: &str, table: &str, rowid: i64| {
                let kind = match action {
                    Action::SQLITE_INSERT => MutationKind::Insert,
                    Action::SQLITE_UPDATE => MutationKind::Update,
                    Action::SQLITE_DELETE => MutationKind::Delete,
                    _ => return,
                };
                hook_collector.record_mutation(MutationEvent { table, rowid, kind });
            },
        ));

        Ok(Self {
            conn: Mutex::new(conn),
            collector,
            registry,
            config,
            path,
            sink: RwLock::new(None),
            migrating: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Attach the consumer-side sink receiving finalized change sets. Until
    /// one is attached, change sets from commits are dropped.
    pub fn attach_sink(&self, sink: Arc<dyn CommitSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Run a write transaction. The closure gets raw SQL access plus the
    /// touch/capture APIs; on success the commit's change set is resolved
    /// inside the still-open transaction and handed to the sink without
    /// blocking. A closure error rolls back and discards all pending state.
    pub fn write<T>(&self, f: impl FnOnce(&mut WriteTransaction<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        self.collector.begin();

        let txn = match guard.transaction_with_behavior(TransactionBehavior::Immediate) {
            Ok(txn) => txn,
            Err(e) => {
                self.collector.abort();
                return Err(VigilError::Storage(e.to_string()));
            }
        };

        let mut wtx = WriteTransaction::new(txn, self.collector.as_ref());
        let out = match f(&mut wtx) {
            Ok(out) => out,
            Err(e) => {
                let (txn, _completions) = wtx.into_parts();
                if let Err(re) = txn.rollback() {
                    warn!(error = %re, "rollback failed");
                }
                self.collector.abort();
                return Err(e);
            }
        };

        // Rowids are only meaningful before the transaction ends, so
        // resolution must happen here, between the caller's last write and
        // the COMMIT.
        let pending = self.collector.take();
        let (txn, completions) = wtx.into_parts();
        let mut changes = if pending.is_empty() {
            ChangeSet::new()
        } else {
            match resolver::resolve(
                &txn,
                &self.registry,
                pending,
                self.config.change_set_ceiling,
            ) {
                Ok(changes) => changes,
                Err(e) => {
                    // The data still commits; subscribers get a full reset
                    // instead of an incremental update.
                    warn!(error = %e, "change tracking failed; publishing a reset");
                    ChangeSet::errored(e)
                }
            }
        };

        if let Err(e) = txn.commit() {
            self.collector.finish();
            return Err(VigilError::Storage(e.to_string()));
        }
        self.collector.finish();

        for completion in completions {
            changes.push_completion(completion);
        }
        if !changes.is_empty() {
            match self.sink.read().as_ref() {
                Some(sink) => sink.submit(changes),
                None => debug!("no commit sink attached; dropping change set"),
            }
        }
        Ok(out)
    }

    /// Like [`write`](Self::write), with a callback run on the consumer
    /// thread once this commit has been published.
    pub fn write_with_completion<T>(
        &self,
        f: impl FnOnce(&mut WriteTransaction<'_>) -> Result<T>,
        on_published: impl FnOnce() + Send + 'static,
    ) -> Result<T> {
        self.write(|wtx| {
            let out = f(wtx)?;
            wtx.on_published(on_published);
            Ok(out)
        })
    }

    /// Open an additional connection to the same database (snapshot reader,
    /// checkpoint coordinator). WAL mode allows these to read and checkpoint
    /// concurrently with the writer.
    pub fn open_companion_connection(&self) -> Result<Connection> {
        let conn =
            Connection::open(&self.path).map_err(|e| VigilError::Storage(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_millis(self.config.busy_timeout_ms))
            .map_err(|e| VigilError::Storage(e.to_string()))?;
        Ok(conn)
    }

    /// Flag a store transfer/migration in progress; checkpointing is
    /// disabled entirely while set.
    pub fn set_migrating(&self, migrating: bool) {
        self.migrating.store(migrating, Ordering::SeqCst);
    }

    /// Shared handle to the migration flag for the checkpoint coordinator.
    pub fn migration_flag(&self) -> Arc<AtomicBool> {
        self.migrating.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }
}

fn configure_connection(conn: &Connection, cfg: &StorageConfig) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| VigilError::Config(e.to_string()))?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|e| VigilError::Config(e.to_string()))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| VigilError::Config(e.to_string()))?;
    conn.pragma_update(None, "cache_size", cfg.cache_size)
        .map_err(|e| VigilError::Config(e.to_string()))?;
    conn.busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms))
        .map_err(|e| VigilError::Config(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;
    use vigil_core::{EntityKind, TableSpec};

    const THREADS: EntityKind = EntityKind("threads");
    const INTERACTIONS: EntityKind = EntityKind("interactions");

    struct ChannelSink(mpsc::Sender<ChangeSet>);

    impl CommitSink for ChannelSink {
        fn submit(&self, changes: ChangeSet) {
            let _ = self.0.send(changes);
        }
    }

    fn registry() -> TableRegistry {
        TableRegistry::builder()
            .track(TableSpec::new("model_thread", THREADS, "unique_id"))
            .track(
                TableSpec::new("model_interaction", INTERACTIONS, "unique_id")
                    .with_parent(THREADS, "thread_unique_id"),
            )
            .build()
    }

    fn test_storage(config: StorageConfig) -> (Storage, mpsc::Receiver<ChangeSet>, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = Storage::open(temp.path().join("vigil.db"), registry(), config).unwrap();
        storage
            .write(|wtx| {
                wtx.execute(
                    "CREATE TABLE model_thread (id INTEGER PRIMARY KEY, unique_id TEXT NOT NULL)",
                    [],
                )?;
                wtx.execute(
                    "CREATE TABLE model_interaction (
                         id INTEGER PRIMARY KEY,
                         unique_id TEXT NOT NULL,
                         thread_unique_id TEXT NOT NULL
                     )",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let (tx, rx) = mpsc::channel();
        storage.attach_sink(Arc::new(ChannelSink(tx)));
        (storage, rx, temp)
    }

    #[test]
    fn test_commit_surfaces_identifiers() {
        let (storage, rx, _temp) = test_storage(StorageConfig::default());
        storage
            .write(|wtx| {
                wtx.execute(
                    "INSERT INTO model_thread (unique_id) VALUES ('T1')",
                    [],
                )?;
                wtx.execute(
                    "INSERT INTO model_interaction (unique_id, thread_unique_id)
                     VALUES ('I1', 'T1')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let changes = rx.try_recv().unwrap();
        assert!(changes.contains(THREADS, "T1"));
        assert!(changes.contains(INTERACTIONS, "I1"));
        assert!(changes.did_update_table("model_interaction"));
        assert_eq!(changes.parents(INTERACTIONS).collect::<Vec<_>>(), vec!["T1"]);
    }

    #[test]
    fn test_rollback_discards_pending_state() {
        let (storage, rx, _temp) = test_storage(StorageConfig::default());

        let result: Result<()> = storage.write(|wtx| {
            wtx.execute("INSERT INTO model_thread (unique_id) VALUES ('T1')", [])?;
            Err(VigilError::InvalidState("boom".into()))
        });
        assert!(result.is_err());
        assert!(rx.try_recv().is_err(), "rolled-back commit must not publish");

        // A subsequent commit carries nothing from the rolled-back one.
        storage
            .write(|wtx| {
                wtx.execute("INSERT INTO model_thread (unique_id) VALUES ('T2')", [])?;
                Ok(())
            })
            .unwrap();
        let changes = rx.try_recv().unwrap();
        assert!(!changes.contains(THREADS, "T1"));
        assert!(changes.contains(THREADS, "T2"));
    }

    #[test]
    fn test_overflow_ships_errored_set() {
        let config = StorageConfig::default().with_ceiling(5);
        let (storage, rx, _temp) = test_storage(config);

        storage
            .write(|wtx| {
                for i in 0..6 {
                    wtx.execute(
                        "INSERT INTO model_thread (unique_id) VALUES (?1)",
                        [format!("T{i}")],
                    )?;
                }
                Ok(())
            })
            .unwrap();

        let changes = rx.try_recv().unwrap();
        assert!(changes.is_errored());
        assert!(matches!(
            changes.last_error(),
            Some(VigilError::ChangeSetTooLarge { count: 6, ceiling: 5 })
        ));
    }

    #[test]
    fn test_ceiling_boundary_exact_succeeds() {
        let config = StorageConfig::default().with_ceiling(5);
        let (storage, rx, _temp) = test_storage(config);

        storage
            .write(|wtx| {
                for i in 0..5 {
                    wtx.execute(
                        "INSERT INTO model_thread (unique_id) VALUES (?1)",
                        [format!("T{i}")],
                    )?;
                }
                Ok(())
            })
            .unwrap();

        let changes = rx.try_recv().unwrap();
        assert!(!changes.is_errored());
        assert_eq!(changes.identifiers(THREADS).count(), 5);
    }

    #[test]
    fn test_touch_without_column_change() {
        let (storage, rx, _temp) = test_storage(StorageConfig::default());
        storage
            .write(|wtx| {
                wtx.touch(THREADS, "T9");
                Ok(())
            })
            .unwrap();

        let changes = rx.try_recv().unwrap();
        assert!(changes.contains(THREADS, "T9"));
        assert!(changes.did_update_table("model_thread"));
    }

    #[test]
    fn test_delete_with_local_capture() {
        let (storage, rx, _temp) = test_storage(StorageConfig::default());
        storage
            .write(|wtx| {
                wtx.execute("INSERT INTO model_thread (unique_id) VALUES ('T1')", [])?;
                Ok(())
            })
            .unwrap();
        let _ = rx.try_recv().unwrap();

        storage
            .write(|wtx| {
                wtx.record_delete(THREADS, "T1");
                wtx.execute("DELETE FROM model_thread WHERE unique_id = 'T1'", [])?;
                Ok(())
            })
            .unwrap();

        let changes = rx.try_recv().unwrap();
        assert!(changes.contains_deleted(THREADS, "T1"));
        assert!(!changes.contains(THREADS, "T1"));
    }

    #[test]
    fn test_empty_write_publishes_nothing() {
        let (storage, rx, _temp) = test_storage(StorageConfig::default());
        storage.write(|_wtx| Ok(())).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_completion_callback_travels_with_set() {
        let (storage, rx, _temp) = test_storage(StorageConfig::default());
        let (done_tx, done_rx) = mpsc::channel();
        storage
            .write_with_completion(
                |wtx| {
                    wtx.execute("INSERT INTO model_thread (unique_id) VALUES ('T1')", [])?;
                    Ok(())
                },
                move || {
                    let _ = done_tx.send(());
                },
            )
            .unwrap();

        let mut changes = rx.try_recv().unwrap();
        let completions = changes.take_completions();
        assert_eq!(completions.len(), 1);
        for completion in completions {
            completion();
        }
        assert!(done_rx.try_recv().is_ok());
    }
}
