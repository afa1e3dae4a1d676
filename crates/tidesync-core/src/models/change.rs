//! Captured changes, tombstones, and deferred inbound updates

use std::fmt;

use serde::{Deserialize, Serialize};

use super::group::GroupHash;

/// Property segment that marks a change path as a record delete.
pub const DELETE_SENTINEL: &str = "__delete__";

/// Kind of mutation a change carries. Discriminants are the wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create = 1,
    Set = 2,
    Delete = 3,
    Increment = 4,
    Decrement = 5,
}

impl Operation {
    pub const fn code(self) -> i64 {
        self as i64
    }

    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Create),
            2 => Some(Self::Set),
            3 => Some(Self::Delete),
            4 => Some(Self::Increment),
            5 => Some(Self::Decrement),
            _ => None,
        }
    }
}

/// `recordId/className/property` address of a change
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangePath {
    pub record_id: String,
    pub class_name: String,
    pub property: String,
}

impl ChangePath {
    pub fn new(
        record_id: impl Into<String>,
        class_name: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            class_name: class_name.into(),
            property: property.into(),
        }
    }

    pub fn delete(record_id: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self::new(record_id, class_name, DELETE_SENTINEL)
    }

    /// Parse a wire path. Returns `None` unless it has exactly three non-empty segments.
    pub fn parse(path: &str) -> Option<Self> {
        let mut segments = path.split('/');
        let record_id = segments.next().filter(|s| !s.is_empty())?;
        let class_name = segments.next().filter(|s| !s.is_empty())?;
        let property = segments.next().filter(|s| !s.is_empty())?;
        if segments.next().is_some() {
            return None;
        }
        Some(Self::new(record_id, class_name, property))
    }

    pub fn is_delete(&self) -> bool {
        self.property.contains(DELETE_SENTINEL)
    }
}

impl fmt::Display for ChangePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.record_id, self.class_name, self.property)
    }
}

/// One captured field mutation or delete, waiting to be sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub record_id: String,
    pub class_name: String,
    pub property: String,
    pub operation: Operation,
    /// Tagged, encrypted wire value; `None` for deletes and explicit nulls
    pub value: Option<String>,
    pub group: GroupHash,
    /// Capture time (Unix ms)
    pub captured_at: i64,
}

impl Change {
    pub fn path(&self) -> ChangePath {
        ChangePath::new(&self.record_id, &self.class_name, &self.property)
    }
}

/// A change as stored in the pending queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedChange {
    /// Queue row id
    pub id: i64,
    pub change: Change,
}

/// An inbound field update waiting for the local schema to gain its field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredChange {
    pub record_id: String,
    pub class_name: String,
    pub property: String,
    /// The undecoded wire value as received
    pub raw_value: Option<String>,
    /// Group the update arrived under
    pub group: GroupHash,
}
