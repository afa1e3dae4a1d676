//! tidesync-core - Core library for Tidesync
//!
//! An offline-first record store. Local commits are captured as per-field
//! changes, encrypted, and exchanged with a reconciliation service that
//! returns the changes other devices made in the visibility groups this
//! device subscribes to.

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use error::{Error, Result};
pub use models::{EntityDescriptor, FieldDescriptor, FieldKind, FieldValue, Record, Schema};
pub use services::{LocalStore, StoreOptions};
pub use state::{ConnectionState, SyncStatus};
pub use sync::{CommitContext, CycleOutcome, CycleReport, StatusCallbacks, SyncService};
