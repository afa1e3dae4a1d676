//! Error types for tidesync-core

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::sync::codec::DecodeError;
use crate::sync::transport::TransportError;

/// Result type alias using tidesync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tidesync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// `SQLite` error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Record does not match its field descriptor
    #[error("Schema error: {0}")]
    Schema(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cipher failure while encoding a value
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Wire value could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Sync transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A shared lock was poisoned by a panicking holder
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}
