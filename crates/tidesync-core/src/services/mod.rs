//! Shared services used by applications and the CLI.

mod local_store;

pub use local_store::{LocalStore, StoreOptions};
