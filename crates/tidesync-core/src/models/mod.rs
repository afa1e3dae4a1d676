//! Data models for Tidesync

mod change;
mod group;
mod record;
mod schema;

pub use change::{
    Change, ChangePath, DeferredChange, Operation, QueuedChange, DELETE_SENTINEL,
};
pub use group::{GroupHash, VisibilityGroup, DEFAULT_GROUP_NAME};
pub use record::{FieldValue, Record};
pub use schema::{
    is_reserved_field, EntityDescriptor, FieldDescriptor, FieldKind, Schema, GROUP_FIELD,
    PRIMARY_KEY_FIELD,
};
