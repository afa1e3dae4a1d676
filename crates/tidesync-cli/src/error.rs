use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tidesync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Group name cannot be empty")]
    EmptyGroupName,
    #[error("Sync failed: {0}")]
    SyncFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Write settings.json to the tidesync config directory, pass --config, or set TIDESYNC_APP_ID, TIDESYNC_API_ACCESS_KEY and TIDESYNC_ENDPOINT."
    )]
    SyncNotConfigured,
}
