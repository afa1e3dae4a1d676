//! Pending change queue, group registry, and sync bookkeeping

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{Change, DeferredChange, GroupHash, Operation, QueuedChange, VisibilityGroup};
use crate::util::{new_identifier, unix_timestamp_millis};

const DEVICE_ID_KEY: &str = "device_id";

/// Trait for the sync engine's own persistent state
pub trait SyncRepository {
    /// Append a change to the outbound queue, returning its queue id
    fn enqueue(&self, change: &Change) -> Result<i64>;

    /// Up to `limit` queued changes, oldest first
    fn next_batch(&self, limit: usize) -> Result<Vec<QueuedChange>>;

    /// Delete queued changes by id
    fn remove_all(&self, ids: &[i64]) -> Result<usize>;

    /// Delete every queued change for one record
    fn purge_record(&self, class_name: &str, record_id: &str) -> Result<usize>;

    /// Number of changes waiting to be sent
    fn pending_count(&self) -> Result<usize>;

    /// Up to `limit` registered groups, least recently polled first
    fn next_groups(&self, limit: usize) -> Result<Vec<VisibilityGroup>>;

    /// Insert or overwrite a group registration
    fn upsert_group(&self, group: &VisibilityGroup) -> Result<()>;

    /// Get a registered group by hash
    fn group(&self, hash: &GroupHash) -> Result<Option<VisibilityGroup>>;

    /// All registered groups, ordered by hash
    fn groups(&self) -> Result<Vec<VisibilityGroup>>;

    /// Unregister a group. Returns whether it was registered.
    fn remove_group(&self, hash: &GroupHash) -> Result<bool>;

    /// Record a successful pull for a registered group.
    ///
    /// Unregistered groups are left alone and an empty tidemark keeps the old one.
    /// Returns whether the group was updated.
    fn record_poll(&self, hash: &GroupHash, tidemark: &str, polled_at: i64) -> Result<bool>;

    /// Remember that `class_name` has queued changes
    fn register_class(&self, class_name: &str) -> Result<()>;

    /// Every record type that has ever queued a change
    fn registered_classes(&self) -> Result<Vec<String>>;

    /// Tombstone a record id deleted by the server
    fn mark_defunct(&self, record_id: &str) -> Result<()>;

    /// Whether a record id has been tombstoned
    fn is_defunct(&self, record_id: &str) -> Result<bool>;

    /// Store an inbound change for an undeclared field, replacing any earlier
    /// one for the same record and property
    fn defer(&self, change: &DeferredChange) -> Result<()>;

    /// Deferred changes in arrival order
    fn deferred_changes(&self) -> Result<Vec<DeferredChange>>;

    /// Drop a deferred change once it has been applied or discarded
    fn remove_deferred(&self, change: &DeferredChange) -> Result<()>;

    /// Drop every deferred change for a record id
    fn discard_deferred_for(&self, record_id: &str) -> Result<usize>;

    /// Stable identifier of this installation, created on first use
    fn device_id(&self) -> Result<String>;
}

/// `SQLite` implementation of `SyncRepository`
pub struct SqliteSyncRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a queued change from a database row
    fn parse_queued(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedChange> {
        let code: i64 = row.get(4)?;
        let operation = Operation::from_code(code).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Integer,
                format!("unknown operation code {code}").into(),
            )
        })?;

        Ok(QueuedChange {
            id: row.get(0)?,
            change: Change {
                record_id: row.get(1)?,
                class_name: row.get(2)?,
                property: row.get(3)?,
                operation,
                value: row.get(5)?,
                group: GroupHash::from_hashed(row.get::<_, String>(6)?),
                captured_at: row.get(7)?,
            },
        })
    }

    /// Parse a group from a database row
    fn parse_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<VisibilityGroup> {
        Ok(VisibilityGroup {
            hash: GroupHash::from_hashed(row.get::<_, String>(0)?),
            tidemark: row.get(1)?,
            last_polled_at: row.get(2)?,
        })
    }

    /// Parse a deferred change from a database row
    fn parse_deferred(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeferredChange> {
        Ok(DeferredChange {
            record_id: row.get(0)?,
            class_name: row.get(1)?,
            property: row.get(2)?,
            raw_value: row.get(3)?,
            group: GroupHash::from_hashed(row.get::<_, String>(4)?),
        })
    }
}

impl SyncRepository for SqliteSyncRepository<'_> {
    fn enqueue(&self, change: &Change) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO pending_changes (record_id, class_name, property, operation, value, group_hash, captured_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                change.record_id,
                change.class_name,
                change.property,
                change.operation.code(),
                change.value,
                change.group.as_str(),
                change.captured_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn next_batch(&self, limit: usize) -> Result<Vec<QueuedChange>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, record_id, class_name, property, operation, value, group_hash, captured_at
             FROM pending_changes
             ORDER BY captured_at ASC, id ASC
             LIMIT ?",
        )?;

        let changes = stmt
            .query_map(params![limit as i64], Self::parse_queued)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(changes)
    }

    fn remove_all(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM pending_changes WHERE id IN ({placeholders})");
        Ok(self.conn.execute(&sql, params_from_iter(ids.iter()))?)
    }

    fn purge_record(&self, class_name: &str, record_id: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM pending_changes WHERE class_name = ? AND record_id = ?",
            params![class_name, record_id],
        )?;
        Ok(rows)
    }

    fn pending_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pending_changes", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| Error::InvalidInput("negative row count".into()))
    }

    fn next_groups(&self, limit: usize) -> Result<Vec<VisibilityGroup>> {
        let mut stmt = self.conn.prepare(
            "SELECT group_hash, tidemark, last_polled_at
             FROM sync_groups
             ORDER BY last_polled_at ASC, group_hash ASC
             LIMIT ?",
        )?;

        let groups = stmt
            .query_map(params![limit as i64], Self::parse_group)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(groups)
    }

    fn upsert_group(&self, group: &VisibilityGroup) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_groups (group_hash, tidemark, last_polled_at) VALUES (?, ?, ?)
             ON CONFLICT(group_hash) DO UPDATE SET
                tidemark = excluded.tidemark,
                last_polled_at = excluded.last_polled_at",
            params![group.hash.as_str(), group.tidemark, group.last_polled_at],
        )?;
        Ok(())
    }

    fn group(&self, hash: &GroupHash) -> Result<Option<VisibilityGroup>> {
        let group = self
            .conn
            .query_row(
                "SELECT group_hash, tidemark, last_polled_at FROM sync_groups WHERE group_hash = ?",
                params![hash.as_str()],
                Self::parse_group,
            )
            .optional()?;
        Ok(group)
    }

    fn groups(&self) -> Result<Vec<VisibilityGroup>> {
        let mut stmt = self.conn.prepare(
            "SELECT group_hash, tidemark, last_polled_at FROM sync_groups ORDER BY group_hash",
        )?;

        let groups = stmt
            .query_map([], Self::parse_group)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(groups)
    }

    fn remove_group(&self, hash: &GroupHash) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM sync_groups WHERE group_hash = ?",
            params![hash.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn record_poll(&self, hash: &GroupHash, tidemark: &str, polled_at: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_groups
             SET tidemark = COALESCE(NULLIF(?, ''), tidemark), last_polled_at = ?
             WHERE group_hash = ?",
            params![tidemark, polled_at, hash.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn register_class(&self, class_name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO registered_classes (class_name) VALUES (?)",
            params![class_name],
        )?;
        Ok(())
    }

    fn registered_classes(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT class_name FROM registered_classes ORDER BY class_name")?;

        let classes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(classes)
    }

    fn mark_defunct(&self, record_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO defunct_records (defunct_id, created_at) VALUES (?, ?)",
            params![record_id, unix_timestamp_millis()],
        )?;
        Ok(())
    }

    fn is_defunct(&self, record_id: &str) -> Result<bool> {
        let defunct = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM defunct_records WHERE defunct_id = ?)",
            params![record_id],
            |row| row.get(0),
        )?;
        Ok(defunct)
    }

    fn defer(&self, change: &DeferredChange) -> Result<()> {
        self.conn.execute(
            "INSERT INTO deferred_changes (record_id, class_name, property, raw_value, group_hash, received_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(record_id, class_name, property) DO UPDATE SET
                raw_value = excluded.raw_value,
                group_hash = excluded.group_hash,
                received_at = excluded.received_at",
            params![
                change.record_id,
                change.class_name,
                change.property,
                change.raw_value,
                change.group.as_str(),
                unix_timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn deferred_changes(&self) -> Result<Vec<DeferredChange>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id, class_name, property, raw_value, group_hash
             FROM deferred_changes
             ORDER BY received_at ASC, rowid ASC",
        )?;

        let changes = stmt
            .query_map([], Self::parse_deferred)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(changes)
    }

    fn remove_deferred(&self, change: &DeferredChange) -> Result<()> {
        self.conn.execute(
            "DELETE FROM deferred_changes WHERE record_id = ? AND class_name = ? AND property = ?",
            params![change.record_id, change.class_name, change.property],
        )?;
        Ok(())
    }

    fn discard_deferred_for(&self, record_id: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM deferred_changes WHERE record_id = ?",
            params![record_id],
        )?;
        Ok(rows)
    }

    fn device_id(&self) -> Result<String> {
        self.conn.execute(
            "INSERT OR IGNORE INTO sync_options (key, value) VALUES (?, ?)",
            params![DEVICE_ID_KEY, new_identifier()],
        )?;
        let device_id = self.conn.query_row(
            "SELECT value FROM sync_options WHERE key = ?",
            params![DEVICE_ID_KEY],
            |row| row.get(0),
        )?;
        Ok(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn change(record_id: &str, property: &str, captured_at: i64) -> Change {
        Change {
            record_id: record_id.to_string(),
            class_name: "Person".to_string(),
            property: property.to_string(),
            operation: Operation::Set,
            value: Some("text/AAAA".to_string()),
            group: GroupHash::from_hashed("g1"),
            captured_at,
        }
    }

    #[test]
    fn test_enqueue_and_next_batch_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncRepository::new(db.connection());

        repo.enqueue(&change("r1", "name", 300)).unwrap();
        repo.enqueue(&change("r2", "name", 100)).unwrap();
        repo.enqueue(&change("r3", "name", 200)).unwrap();

        let batch = repo.next_batch(10).unwrap();
        let ids: Vec<_> = batch.iter().map(|q| q.change.record_id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3", "r1"]);
        assert_eq!(batch[0].change, change("r2", "name", 100));
    }

    #[test]
    fn test_next_batch_respects_limit() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncRepository::new(db.connection());

        for index in 0..101 {
            repo.enqueue(&change(&format!("r{index}"), "name", index))
                .unwrap();
        }

        let batch = repo.next_batch(100).unwrap();
        assert_eq!(batch.len(), 100);
        assert_eq!(batch[0].change.record_id, "r0");
        assert_eq!(repo.pending_count().unwrap(), 101);

        let ids: Vec<i64> = batch.iter().map(|q| q.id).collect();
        assert_eq!(repo.remove_all(&ids).unwrap(), 100);

        let rest = repo.next_batch(100).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].change.record_id, "r100");
    }

    #[test]
    fn test_remove_all_empty_is_noop() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncRepository::new(db.connection());
        assert_eq!(repo.remove_all(&[]).unwrap(), 0);
    }

    #[test]
    fn test_purge_record() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncRepository::new(db.connection());

        repo.enqueue(&change("r1", "name", 1)).unwrap();
        repo.enqueue(&change("r1", "age", 2)).unwrap();
        repo.enqueue(&change("r2", "name", 3)).unwrap();

        assert_eq!(repo.purge_record("Person", "r1").unwrap(), 2);
        assert_eq!(repo.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_next_groups_least_recently_polled_first() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncRepository::new(db.connection());

        for (hash, polled) in [("a", 30), ("b", 10), ("c", 20)] {
            repo.upsert_group(&VisibilityGroup {
                hash: GroupHash::from_hashed(hash),
                tidemark: None,
                last_polled_at: polled,
            })
            .unwrap();
        }

        let groups = repo.next_groups(2).unwrap();
        let hashes: Vec<_> = groups.iter().map(|g| g.hash.as_str()).collect();
        assert_eq!(hashes, vec!["b", "c"]);
    }

    #[test]
    fn test_record_poll_updates_registered_groups_only() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncRepository::new(db.connection());
        let g1 = GroupHash::from_hashed("g1");

        assert!(!repo.record_poll(&g1, "t1", 5).unwrap());
        assert_eq!(repo.group(&g1).unwrap(), None);

        repo.upsert_group(&VisibilityGroup::new(g1.clone())).unwrap();
        assert!(repo.record_poll(&g1, "t1", 5).unwrap());
        assert!(repo.record_poll(&g1, "", 9).unwrap());

        let stored = repo.group(&g1).unwrap().unwrap();
        assert_eq!(stored.tidemark.as_deref(), Some("t1"));
        assert_eq!(stored.last_polled_at, 9);
    }

    #[test]
    fn test_remove_group() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncRepository::new(db.connection());
        let g1 = GroupHash::from_hashed("g1");

        repo.upsert_group(&VisibilityGroup::new(g1.clone())).unwrap();
        assert_eq!(repo.groups().unwrap().len(), 1);
        assert!(repo.remove_group(&g1).unwrap());
        assert!(!repo.remove_group(&g1).unwrap());
        assert!(repo.groups().unwrap().is_empty());
    }

    #[test]
    fn test_registered_classes_are_unique() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncRepository::new(db.connection());

        repo.register_class("Person").unwrap();
        repo.register_class("Person").unwrap();
        repo.register_class("Pet").unwrap();

        assert_eq!(repo.registered_classes().unwrap(), vec!["Person", "Pet"]);
    }

    #[test]
    fn test_defunct_records() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncRepository::new(db.connection());

        assert!(!repo.is_defunct("r1").unwrap());
        repo.mark_defunct("r1").unwrap();
        repo.mark_defunct("r1").unwrap();
        assert!(repo.is_defunct("r1").unwrap());
    }

    #[test]
    fn test_defer_keeps_latest_per_property() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncRepository::new(db.connection());

        let mut deferred = DeferredChange {
            record_id: "r1".to_string(),
            class_name: "Person".to_string(),
            property: "email".to_string(),
            raw_value: Some("text/old".to_string()),
            group: GroupHash::from_hashed("g1"),
        };
        repo.defer(&deferred).unwrap();
        deferred.raw_value = Some("text/new".to_string());
        repo.defer(&deferred).unwrap();

        let stored = repo.deferred_changes().unwrap();
        assert_eq!(stored, vec![deferred.clone()]);

        repo.remove_deferred(&deferred).unwrap();
        assert!(repo.deferred_changes().unwrap().is_empty());
    }

    #[test]
    fn test_device_id_is_stable() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncRepository::new(db.connection());

        let first = repo.device_id().unwrap();
        assert!(!first.is_empty());
        assert_eq!(repo.device_id().unwrap(), first);
    }
}
