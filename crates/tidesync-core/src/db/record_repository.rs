//! Record repository implementation

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{FieldValue, GroupHash, Record, Schema};
use crate::util::unix_timestamp_millis;

/// Trait for local record storage
///
/// Writes through this trait never capture changes; capture happens a layer up.
pub trait RecordRepository {
    /// Schema the repository validates against
    fn schema(&self) -> &Schema;

    /// Get a record by type and id
    fn fetch(&self, class_name: &str, id: &str) -> Result<Option<Record>>;

    /// Whether a record with this id exists
    fn exists(&self, class_name: &str, id: &str) -> Result<bool>;

    /// Insert or replace a record after validating it against the schema
    fn write(&self, record: &Record) -> Result<()>;

    /// Delete a record. Returns whether a row was removed.
    fn delete(&self, class_name: &str, id: &str) -> Result<bool>;

    /// Delete every record of `class_name` stored under `group`
    fn delete_by_group(&self, class_name: &str, group: &GroupHash) -> Result<usize>;

    /// Whether the local schema declares `property` on `class_name`
    fn field_exists(&self, class_name: &str, property: &str) -> bool {
        self.schema().field_exists(class_name, property)
    }
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
    schema: &'a Schema,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection and schema
    pub const fn new(conn: &'a Connection, schema: &'a Schema) -> Self {
        Self { conn, schema }
    }

    fn validate(&self, record: &Record) -> Result<()> {
        let entity = self.schema.entity(record.class_name()).ok_or_else(|| {
            Error::Schema(format!("unknown record type '{}'", record.class_name()))
        })?;

        for (name, value) in record.fields() {
            let descriptor = entity.field(name).ok_or_else(|| {
                Error::Schema(format!("{}.{name} is not declared", record.class_name()))
            })?;
            match value.kind() {
                None if !descriptor.nullable => {
                    return Err(Error::Schema(format!(
                        "{}.{name} is not nullable",
                        record.class_name()
                    )));
                }
                Some(kind) if kind != descriptor.kind => {
                    return Err(Error::Schema(format!(
                        "{}.{name} expects {:?}, got {kind:?}",
                        record.class_name(),
                        descriptor.kind
                    )));
                }
                _ => {}
            }
            if matches!(value, FieldValue::Double(number) if !number.is_finite()) {
                return Err(Error::Schema(format!(
                    "{}.{name} must be a finite number",
                    record.class_name()
                )));
            }
        }

        Ok(())
    }

    /// Parse a record row; fields are decoded by the caller
    fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
        Ok(StoredRow {
            class_name: row.get(0)?,
            id: row.get(1)?,
            group: row.get(2)?,
            fields: row.get(3)?,
        })
    }
}

struct StoredRow {
    class_name: String,
    id: String,
    group: Option<String>,
    fields: String,
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn fetch(&self, class_name: &str, id: &str) -> Result<Option<Record>> {
        let row = self
            .conn
            .query_row(
                "SELECT class_name, id, visibility_group, fields FROM records WHERE class_name = ? AND id = ?",
                params![class_name, id],
                Self::parse_row,
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };
        let fields: BTreeMap<String, FieldValue> = serde_json::from_str(&row.fields)?;
        Ok(Some(Record::from_stored(
            row.class_name,
            row.id,
            row.group.map(GroupHash::from_hashed),
            fields,
        )))
    }

    fn exists(&self, class_name: &str, id: &str) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM records WHERE class_name = ? AND id = ?)",
            params![class_name, id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn write(&self, record: &Record) -> Result<()> {
        self.validate(record)?;
        let fields = serde_json::to_string(record.fields())?;

        self.conn.execute(
            "INSERT INTO records (class_name, id, visibility_group, fields, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(class_name, id) DO UPDATE SET
                visibility_group = excluded.visibility_group,
                fields = excluded.fields,
                updated_at = excluded.updated_at",
            params![
                record.class_name(),
                record.id(),
                record.group().map(GroupHash::as_str),
                fields,
                unix_timestamp_millis()
            ],
        )?;

        Ok(())
    }

    fn delete(&self, class_name: &str, id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM records WHERE class_name = ? AND id = ?",
            params![class_name, id],
        )?;
        Ok(rows > 0)
    }

    fn delete_by_group(&self, class_name: &str, group: &GroupHash) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM records WHERE class_name = ? AND visibility_group = ?",
            params![class_name, group.as_str()],
        )?;
        Ok(rows)
    }
}
