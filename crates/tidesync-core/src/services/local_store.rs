//! Thread-safe local store shared by the application and the sync service.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::db::{
    Database, RecordRepository, SqliteRecordRepository, SqliteSyncRepository, SyncRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    DeferredChange, EntityDescriptor, GroupHash, Record, Schema, VisibilityGroup,
};
use crate::sync::apply::{ApplyReport, ResponseApplier};
use crate::sync::capture::{ChangeCapture, CommitContext};
use crate::sync::codec::ValueCodec;
use crate::sync::protocol::SyncResponse;
use crate::sync::request::{build_request, BatchLimits, ClientIdentity, OutboundBatch};

/// Store behavior switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Register a group the first time a record is committed into it
    pub auto_subscribe_groups: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            auto_subscribe_groups: true,
        }
    }
}

struct StoreState {
    db: Database,
    schema: Schema,
}

struct StoreInner {
    state: Mutex<StoreState>,
    codec: ValueCodec,
    options: StoreOptions,
    device_id: String,
    db_path: Option<PathBuf>,
}

/// Records plus sync bookkeeping behind one lock.
///
/// Every commit, remove and sync step runs in its own `SQLite` transaction, so
/// a record and the changes it queues are written together or not at all.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub fn open_path(
        db_path: impl Into<PathBuf>,
        schema: Schema,
        codec: ValueCodec,
        options: StoreOptions,
    ) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path) {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is not a database: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_file(&db_path)?;
                Database::open(&db_path)?
            }
            Err(error) => return Err(error),
        };

        Self::from_database(db, schema, codec, options, Some(db_path))
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory(schema: Schema, codec: ValueCodec) -> Result<Self> {
        Self::from_database(
            Database::open_in_memory()?,
            schema,
            codec,
            StoreOptions::default(),
            None,
        )
    }

    fn from_database(
        mut db: Database,
        schema: Schema,
        codec: ValueCodec,
        options: StoreOptions,
        db_path: Option<PathBuf>,
    ) -> Result<Self> {
        let tx = db.transaction()?;
        let device_id = SqliteSyncRepository::new(&tx).device_id()?;
        let replayed = ResponseApplier::new(
            SqliteRecordRepository::new(&tx, &schema),
            SqliteSyncRepository::new(&tx),
            &codec,
        )
        .replay_deferred()?;
        tx.commit()?;

        if replayed > 0 {
            tracing::info!("Applied {replayed} deferred changes");
        }

        Ok(Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState { db, schema }),
                codec,
                options,
                device_id,
                db_path,
            }),
        })
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    fn quarantine_corrupted_db_file(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let file_name = db_path
                .file_name()
                .map_or_else(|| "tidesync.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{file_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }
        Ok(())
    }

    /// Filesystem path, `None` for in-memory stores
    pub fn db_path(&self) -> Option<&Path> {
        self.inner.db_path.as_deref()
    }

    /// Stable identifier of this installation
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Commit under the default group
    pub fn commit(&self, record: &mut Record) -> Result<()> {
        self.commit_in(record, &CommitContext::default_group())
    }

    /// Commit under the group named by `context`.
    ///
    /// On error nothing is written and `record` keeps its dirty fields.
    pub fn commit_in(&self, record: &mut Record, context: &CommitContext) -> Result<()> {
        let auto_subscribe = self.inner.options.auto_subscribe_groups;
        let mut working = record.clone();
        self.in_transaction(|conn, schema| {
            ChangeCapture::new(
                SqliteRecordRepository::new(conn, schema),
                SqliteSyncRepository::new(conn),
                &self.inner.codec,
                auto_subscribe,
            )
            .commit(&mut working, context)
        })?;
        *record = working;
        Ok(())
    }

    /// Remove a stored record and queue its delete
    pub fn remove(&self, record: &Record) -> Result<()> {
        self.remove_by_key(record.class_name(), record.id())
    }

    pub fn remove_by_key(&self, class_name: &str, id: &str) -> Result<()> {
        self.in_transaction(|conn, schema| {
            ChangeCapture::new(
                SqliteRecordRepository::new(conn, schema),
                SqliteSyncRepository::new(conn),
                &self.inner.codec,
                false,
            )
            .remove(class_name, id)
        })
    }

    pub fn fetch(&self, class_name: &str, id: &str) -> Result<Option<Record>> {
        self.with_state(|state| {
            SqliteRecordRepository::new(state.db.connection(), &state.schema).fetch(class_name, id)
        })
    }

    pub fn field_exists(&self, class_name: &str, property: &str) -> Result<bool> {
        self.with_state(|state| Ok(state.schema.field_exists(class_name, property)))
    }

    /// Start polling a group. Re-adding a group keeps its tidemark.
    pub fn add_group(&self, name: &str) -> Result<GroupHash> {
        let hash = GroupHash::from_name(name);
        let added = self.in_transaction(|conn, _| {
            let queue = SqliteSyncRepository::new(conn);
            if queue.group(&hash)?.is_some() {
                return Ok(false);
            }
            queue.upsert_group(&VisibilityGroup::new(hash.clone()))?;
            Ok(true)
        })?;

        if added {
            tracing::info!("Registered group {hash}");
        }
        Ok(hash)
    }

    /// Stop polling a group and drop its local records without queueing deletes.
    ///
    /// Returns the number of records removed.
    pub fn remove_group(&self, name: &str) -> Result<usize> {
        let hash = GroupHash::from_name(name);
        let removed = self.in_transaction(|conn, schema| {
            let queue = SqliteSyncRepository::new(conn);
            let records = SqliteRecordRepository::new(conn, schema);

            if !queue.remove_group(&hash)? {
                return Err(Error::NotFound(format!("group '{name}'")));
            }

            let mut classes: BTreeSet<String> = queue.registered_classes()?.into_iter().collect();
            classes.extend(schema.entities().map(|entity| entity.name.clone()));

            let mut removed = 0;
            for class_name in &classes {
                removed += records.delete_by_group(class_name, &hash)?;
            }
            Ok(removed)
        })?;

        tracing::info!("Unregistered group {hash}, removed {removed} local records");
        Ok(removed)
    }

    pub fn groups(&self) -> Result<Vec<VisibilityGroup>> {
        self.with_state(|state| SqliteSyncRepository::new(state.db.connection()).groups())
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.with_state(|state| SqliteSyncRepository::new(state.db.connection()).pending_count())
    }

    pub fn deferred_changes(&self) -> Result<Vec<DeferredChange>> {
        self.with_state(|state| {
            SqliteSyncRepository::new(state.db.connection()).deferred_changes()
        })
    }

    pub fn is_defunct(&self, record_id: &str) -> Result<bool> {
        self.with_state(|state| SqliteSyncRepository::new(state.db.connection()).is_defunct(record_id))
    }

    /// Add or replace a record type, then apply deferred changes it unlocks.
    ///
    /// Returns the number of deferred changes applied.
    pub fn register_entity(&self, entity: EntityDescriptor) -> Result<usize> {
        self.with_state(|state| state.schema.register(entity))?;
        self.replay_deferred()
    }

    /// Apply deferred changes whose field the schema now declares
    pub fn replay_deferred(&self) -> Result<usize> {
        self.in_transaction(|conn, schema| {
            ResponseApplier::new(
                SqliteRecordRepository::new(conn, schema),
                SqliteSyncRepository::new(conn),
                &self.inner.codec,
            )
            .replay_deferred()
        })
    }

    pub(crate) fn build_request(
        &self,
        identity: &ClientIdentity,
        limits: BatchLimits,
        now_ms: i64,
    ) -> Result<OutboundBatch> {
        self.with_state(|state| {
            build_request(
                &SqliteSyncRepository::new(state.db.connection()),
                identity,
                limits,
                now_ms,
            )
        })
    }

    pub(crate) fn apply_response(
        &self,
        response: &SyncResponse,
        sent: &[i64],
        now_ms: i64,
    ) -> Result<ApplyReport> {
        self.in_transaction(|conn, schema| {
            ResponseApplier::new(
                SqliteRecordRepository::new(conn, schema),
                SqliteSyncRepository::new(conn),
                &self.inner.codec,
            )
            .apply(response, sent, now_ms)
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| Error::LockPoisoned("local store".to_string()))?;
        f(&mut state)
    }

    fn in_transaction<T>(&self, f: impl FnOnce(&Connection, &Schema) -> Result<T>) -> Result<T> {
        self.with_state(|state| {
            let tx = state.db.transaction()?;
            let value = f(&tx, &state.schema)?;
            tx.commit()?;
            Ok(value)
        })
    }
}
