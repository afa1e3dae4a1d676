//! Record model

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::group::GroupHash;
use super::schema::{EntityDescriptor, FieldKind};
use crate::util::new_identifier;

/// A typed field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Double(f64),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
    Image(Vec<u8>),
    Dictionary(serde_json::Map<String, serde_json::Value>),
    Array(Vec<serde_json::Value>),
    /// Id of the referenced record
    Entity(String),
}

impl FieldValue {
    /// Semantic kind of this value, `None` for null
    pub const fn kind(&self) -> Option<FieldKind> {
        match self {
            Self::Null => None,
            Self::Text(_) => Some(FieldKind::Text),
            Self::Integer(_) => Some(FieldKind::Integer),
            Self::Double(_) => Some(FieldKind::Double),
            Self::Date(_) => Some(FieldKind::Date),
            Self::Bytes(_) => Some(FieldKind::Bytes),
            Self::Image(_) => Some(FieldKind::Image),
            Self::Dictionary(_) => Some(FieldKind::Dictionary),
            Self::Array(_) => Some(FieldKind::Array),
            Self::Entity(_) => Some(FieldKind::Entity),
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert a decoded value into the kind a field declares.
    ///
    /// Numbers convert between integer and double only when lossless.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn coerce_to(self, kind: FieldKind) -> Option<Self> {
        if self.kind().map_or(true, |current| current == kind) {
            return Some(self);
        }
        match (self, kind) {
            (Self::Integer(value), FieldKind::Double) => Some(Self::Double(value as f64)),
            (Self::Double(value), FieldKind::Integer)
                if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 =>
            {
                Some(Self::Integer(value as i64))
            }
            (Self::Bytes(bytes), FieldKind::Image) => Some(Self::Image(bytes)),
            (Self::Image(bytes), FieldKind::Bytes) => Some(Self::Bytes(bytes)),
            (Self::Text(id), FieldKind::Entity) => Some(Self::Entity(id)),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

/// A record in the local store
///
/// Tracks which fields were changed since it was loaded or last committed,
/// and may own embedded child records attached to entity fields. Children are
/// committed before their parent; the parent only stores their ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    class_name: String,
    id: String,
    group: Option<GroupHash>,
    fields: BTreeMap<String, FieldValue>,
    dirty: BTreeSet<String>,
    embedded: BTreeMap<String, Record>,
}

impl Record {
    /// Create a new record of `class_name` with a fresh id
    pub fn new(class_name: impl Into<String>) -> Self {
        Self::with_id(class_name, new_identifier())
    }

    /// Create a record of `class_name` with a known id
    pub fn with_id(class_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            id: id.into(),
            group: None,
            fields: BTreeMap::new(),
            dirty: BTreeSet::new(),
            embedded: BTreeMap::new(),
        }
    }

    /// Rebuild a clean record from stored state
    pub(crate) fn from_stored(
        class_name: String,
        id: String,
        group: Option<GroupHash>,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self {
            class_name,
            id,
            group,
            fields,
            dirty: BTreeSet::new(),
            embedded: BTreeMap::new(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Hashed visibility group the record was last committed under
    pub const fn group(&self) -> Option<&GroupHash> {
        self.group.as_ref()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub const fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Set a field value and mark it dirty
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        let field = field.into();
        self.fields.insert(field.clone(), value.into());
        self.dirty.insert(field);
    }

    /// Attach a child record to an entity field.
    ///
    /// The child is committed with this record and the field receives its id.
    pub fn embed(&mut self, field: impl Into<String>, child: Self) {
        let field = field.into();
        self.fields
            .insert(field.clone(), FieldValue::Entity(child.id.clone()));
        self.dirty.insert(field.clone());
        self.embedded.insert(field, child);
    }

    pub fn embedded(&self, field: &str) -> Option<&Self> {
        self.embedded.get(field)
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub const fn dirty_fields(&self) -> &BTreeSet<String> {
        &self.dirty
    }

    /// Mark every declared field dirty so the full record is re-sent
    pub fn mark_all_dirty(&mut self, descriptor: &EntityDescriptor) {
        for name in descriptor.field_names() {
            self.dirty.insert(name.to_string());
        }
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.id = id;
    }

    pub(crate) fn set_group(&mut self, group: GroupHash) {
        self.group = Some(group);
    }

    /// Set a field without marking it dirty (inbound sync)
    pub(crate) fn apply_field(&mut self, field: &str, value: FieldValue) {
        self.fields.insert(field.to_string(), value);
    }

    /// Copy stored fields this instance never loaded, without dirtying them
    pub(crate) fn fill_missing_from(&mut self, stored: &Self) {
        for (field, value) in &stored.fields {
            self.fields
                .entry(field.clone())
                .or_insert_with(|| value.clone());
        }
    }

    pub(crate) fn embedded_mut(&mut self) -> impl Iterator<Item = (&String, &mut Self)> {
        self.embedded.iter_mut()
    }
}
