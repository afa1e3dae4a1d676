//! Visibility group model

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::md5_hex;

/// Name of the group records are committed under when the caller names none.
pub const DEFAULT_GROUP_NAME: &str = "__default__";

/// Hashed identifier of a visibility group, as stored and sent on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupHash(String);

impl GroupHash {
    /// Hash a plaintext group name (lower-case hex MD5)
    pub fn from_name(name: &str) -> Self {
        Self(md5_hex(name.as_bytes()))
    }

    /// Wrap an already-hashed identifier (stored or received from the server)
    pub fn from_hashed(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn default_group() -> Self {
        Self::from_name(DEFAULT_GROUP_NAME)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered visibility group and its pull cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityGroup {
    pub hash: GroupHash,
    /// Opaque server cursor, `None` until the first successful pull
    pub tidemark: Option<String>,
    /// Unix ms of the last successful pull, 0 when never polled
    pub last_polled_at: i64,
}

impl VisibilityGroup {
    pub const fn new(hash: GroupHash) -> Self {
        Self {
            hash,
            tidemark: None,
            last_polled_at: 0,
        }
    }

    pub fn from_name(name: &str) -> Self {
        Self::new(GroupHash::from_name(name))
    }
}
