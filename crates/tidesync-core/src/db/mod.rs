//! Database layer for Tidesync

mod connection;
mod migrations;
mod record_repository;
mod sync_repository;

pub use connection::Database;
pub use record_repository::{RecordRepository, SqliteRecordRepository};
pub use sync_repository::{SqliteSyncRepository, SyncRepository};
