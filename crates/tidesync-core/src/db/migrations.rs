//! Database migrations

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }
    if version < 2 {
        apply(conn, 2, MIGRATION_V2)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Version 1: local records and the outbound queue
const MIGRATION_V1: &[&str] = &[
    // Schema version tracking
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    // Records of every synced type, fields as typed JSON
    "CREATE TABLE IF NOT EXISTS records (
        class_name TEXT NOT NULL,
        id TEXT NOT NULL,
        visibility_group TEXT,
        fields TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (class_name, id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_records_group ON records(visibility_group)",
    // Pending outbound changes
    "CREATE TABLE IF NOT EXISTS pending_changes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        record_id TEXT NOT NULL,
        class_name TEXT NOT NULL,
        property TEXT NOT NULL,
        operation INTEGER NOT NULL,
        value TEXT,
        group_hash TEXT NOT NULL,
        captured_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_pending_changes_captured ON pending_changes(captured_at, id)",
    "CREATE INDEX IF NOT EXISTS idx_pending_changes_record ON pending_changes(class_name, record_id)",
    // Record types that have ever queued a change
    "CREATE TABLE IF NOT EXISTS registered_classes (
        class_name TEXT PRIMARY KEY
    )",
    // Device-local options (device id)
    "CREATE TABLE IF NOT EXISTS sync_options (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// Version 2: group registry, tombstones, deferred inbound changes
const MIGRATION_V2: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_groups (
        group_hash TEXT PRIMARY KEY,
        tidemark TEXT,
        last_polled_at INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_groups_polled ON sync_groups(last_polled_at)",
    "CREATE TABLE IF NOT EXISTS defunct_records (
        defunct_id TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS deferred_changes (
        record_id TEXT NOT NULL,
        class_name TEXT NOT NULL,
        property TEXT NOT NULL,
        raw_value TEXT,
        group_hash TEXT NOT NULL,
        received_at INTEGER NOT NULL,
        PRIMARY KEY (record_id, class_name, property)
    )",
    "CREATE INDEX IF NOT EXISTS idx_deferred_changes_class ON deferred_changes(class_name)",
];

fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute_batch("BEGIN TRANSACTION")?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, []) {
            conn.execute_batch("ROLLBACK").ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .and_then(|_| conn.execute_batch("COMMIT"))
    {
        conn.execute_batch("ROLLBACK").ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version} of {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_create_sync_tables() {
        let conn = setup();
        run(&conn).unwrap();

        for table in [
            "records",
            "pending_changes",
            "registered_classes",
            "sync_options",
            "sync_groups",
            "defunct_records",
            "deferred_changes",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }
}
