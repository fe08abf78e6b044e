//! Domain models for the dynamic entity store.
//!
//! - [`FieldType`] - declared type of an entity field
//! - [`FieldDef`] - one field of an entity definition
//! - [`EntityDefinition`] - a schema-defined entity type
//! - [`EntityRecord`] - one stored entity
//! - [`SYSTEM_FIELDS`] - store-managed fields that are never user-mappable

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// A row of named values flowing through the pipeline.
pub type Record = Map<String, Value>;

// =============================================================================
// System Fields
// =============================================================================

/// Fields managed by the store itself.
pub const SYSTEM_FIELDS: &[&str] = &[
    "uuid",
    "entity_type",
    "path",
    "created_at",
    "updated_at",
    "created_by",
    "updated_by",
    "published",
    "version",
];

/// Whether `name` is a store-managed field.
pub fn is_system_field(name: &str) -> bool {
    SYSTEM_FIELDS.contains(&name)
}

// =============================================================================
// Field Type
// =============================================================================

/// Declared type of an entity field.
///
/// Unknown type names are preserved as [`FieldType::Other`] and coerced like
/// the string family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    String,
    Text,
    Wysiwyg,
    Select,
    Uuid,
    Password,
    Email,
    Url,
    Boolean,
    Integer,
    Float,
    Date,
    DateTime,
    Object,
    Array,
    Other(String),
}

impl FieldType {
    /// Parse a type name, case-insensitively.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "string" => Self::String,
            "text" => Self::Text,
            "wysiwyg" => Self::Wysiwyg,
            "select" => Self::Select,
            "uuid" => Self::Uuid,
            "password" => Self::Password,
            "email" => Self::Email,
            "url" => Self::Url,
            "boolean" | "bool" => Self::Boolean,
            "integer" | "int" => Self::Integer,
            "float" | "number" | "decimal" => Self::Float,
            "date" => Self::Date,
            "datetime" | "date_time" => Self::DateTime,
            "object" | "json" => Self::Object,
            "array" => Self::Array,
            _ => Self::Other(name.to_string()),
        }
    }

    /// Canonical type name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "String",
            Self::Text => "Text",
            Self::Wysiwyg => "Wysiwyg",
            Self::Select => "Select",
            Self::Uuid => "Uuid",
            Self::Password => "Password",
            Self::Email => "Email",
            Self::Url => "Url",
            Self::Boolean => "Boolean",
            Self::Integer => "Integer",
            Self::Float => "Float",
            Self::Date => "Date",
            Self::DateTime => "DateTime",
            Self::Object => "Object",
            Self::Array => "Array",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Entity Definition
// =============================================================================

/// One field of an entity definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

impl FieldDef {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A schema-defined entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl EntityDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a user-defined field.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// =============================================================================
// Entity Record
// =============================================================================

/// One stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub uuid: Uuid,
    pub entity_type: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fields: Record,
}

impl EntityRecord {
    /// Field snapshot including the system fields a pipeline may read.
    pub fn snapshot(&self) -> Record {
        let mut row = self.fields.clone();
        row.insert("uuid".into(), Value::String(self.uuid.to_string()));
        row.insert("entity_type".into(), Value::String(self.entity_type.clone()));
        row.insert("path".into(), Value::String(self.path.clone()));
        row.insert("created_at".into(), Value::String(self.created_at.to_rfc3339()));
        row.insert("updated_at".into(), Value::String(self.updated_at.to_rfc3339()));
        row
    }

    /// Read a field, system fields included.
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "uuid" => Some(Value::String(self.uuid.to_string())),
            "entity_type" => Some(Value::String(self.entity_type.clone())),
            "path" => Some(Value::String(self.path.clone())),
            "created_at" => Some(Value::String(self.created_at.to_rfc3339())),
            "updated_at" => Some(Value::String(self.updated_at.to_rfc3339())),
            _ => self.fields.get(name).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_type_parse() {
        assert_eq!(FieldType::parse("Boolean"), FieldType::Boolean);
        assert_eq!(FieldType::parse("datetime"), FieldType::DateTime);
        assert_eq!(FieldType::parse("Color"), FieldType::Other("Color".into()));
    }

    #[test]
    fn test_definition_from_json() {
        let def: EntityDefinition = serde_json::from_value(json!({
            "name": "product",
            "fields": [
                { "name": "title", "type": "String", "required": true },
                { "name": "price", "type": "Float" }
            ]
        }))
        .unwrap();

        assert_eq!(def.fields.len(), 2);
        assert!(def.field("title").unwrap().required);
        assert_eq!(def.field("price").unwrap().field_type, FieldType::Float);
        assert_eq!(serde_json::to_value(&def).unwrap()["fields"][1]["type"], "Float");
    }

    #[test]
    fn test_system_fields() {
        assert!(is_system_field("uuid"));
        assert!(is_system_field("path"));
        assert!(!is_system_field("title"));
    }
}
