//! Connection state reported by the sync service.

use serde::Serialize;

/// Outcome of the most recent sync cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No cycle has completed yet
    #[default]
    Idle,
    /// The last cycle reached the service and was accepted
    Connected,
    /// The last cycle failed in transport or was rejected
    Disconnected,
}

/// Snapshot of the service for status displays
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub state: ConnectionState,
    pub active: bool,
    pub pending_changes: usize,
    pub last_error: Option<String>,
    /// Unix ms of the last accepted cycle
    pub last_synced_at: Option<i64>,
}
