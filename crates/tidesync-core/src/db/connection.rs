//! Database connection management

use std::path::Path;

use rusqlite::{Connection, Transaction};

use super::migrations;
use crate::error::Result;

/// Database wrapper for the local `SQLite` store
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let database = Self { conn };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let database = Self { conn };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for concurrent readers and durable single-writer commits
    fn configure(&self) -> Result<()> {
        // In-memory databases reject WAL; that is fine
        self.conn.execute_batch("PRAGMA journal_mode = WAL;").ok();
        self.conn.execute_batch("PRAGMA synchronous = NORMAL;").ok();
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn)
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction; dropped without `commit` it rolls back
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let value: i64 = db
            .connection()
            .query_row("SELECT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_open_file_persists_between_connections() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tidesync.db");

        {
            let db = Database::open(&path).unwrap();
            db.connection()
                .execute(
                    "INSERT INTO registered_classes (class_name) VALUES ('Person')",
                    [],
                )
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM registered_classes", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let mut db = Database::open_in_memory().unwrap();
        {
            let tx = db.transaction().unwrap();
            tx.execute(
                "INSERT INTO registered_classes (class_name) VALUES ('Person')",
                [],
            )
            .unwrap();
        }
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM registered_classes", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
