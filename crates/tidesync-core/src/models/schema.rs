//! Static per-record-type field descriptors

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the primary key field. Never declared by descriptors, never synced as a field.
pub const PRIMARY_KEY_FIELD: &str = "id";

/// Name of the visibility group field. Never declared by descriptors, never synced as a field.
pub const GROUP_FIELD: &str = "visibility_group";

/// Returns whether `name` is one of the reserved record fields.
pub fn is_reserved_field(name: &str) -> bool {
    name == PRIMARY_KEY_FIELD || name == GROUP_FIELD
}

/// Semantic type of a record field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Double,
    Date,
    Bytes,
    Image,
    Dictionary,
    Array,
    /// Reference to another record, stored as that record's id
    Entity,
}

/// One field of a record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

const fn default_nullable() -> bool {
    true
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
        }
    }

    /// Mark the field as non-nullable
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A record type participating in sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.name.contains('/') {
            return Err(Error::Schema(format!(
                "invalid record type name '{}'",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if is_reserved_field(&field.name) {
                return Err(Error::Schema(format!(
                    "{}.{} is a reserved field name",
                    self.name, field.name
                )));
            }
            if field.name.is_empty() || field.name.contains('/') {
                return Err(Error::Schema(format!(
                    "invalid field name '{}' on {}",
                    field.name, self.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::Schema(format!(
                    "duplicate field {}.{}",
                    self.name, field.name
                )));
            }
        }
        Ok(())
    }
}

/// The set of record types known to this installation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    entities: BTreeMap<String, EntityDescriptor>,
}

impl Schema {
    pub fn new(entities: impl IntoIterator<Item = EntityDescriptor>) -> Result<Self> {
        let mut schema = Self::default();
        for entity in entities {
            schema.register(entity)?;
        }
        Ok(schema)
    }

    /// Add or replace a record type
    pub fn register(&mut self, entity: EntityDescriptor) -> Result<()> {
        entity.validate()?;
        self.entities.insert(entity.name.clone(), entity);
        Ok(())
    }

    pub fn entity(&self, class_name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(class_name)
    }

    pub fn field(&self, class_name: &str, property: &str) -> Option<&FieldDescriptor> {
        self.entity(class_name)?.field(property)
    }

    pub fn field_exists(&self, class_name: &str, property: &str) -> bool {
        self.field(class_name, property).is_some()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }

    /// Parse a schema from a JSON array of entity descriptors.
    pub fn from_json(payload: &str) -> Result<Self> {
        let entities: Vec<EntityDescriptor> = serde_json::from_str(payload)?;
        Self::new(entities)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}
