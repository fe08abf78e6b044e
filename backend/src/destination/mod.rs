//! Destination adapters.
//!
//! - [`FormatSink`] buffers rows for a `format` destination and serializes
//!   them once the run is over
//! - [`EntityWriter`] coerces and writes rows to the entity store
//! - [`forward_row`] maps a row for the step a `next_step` destination feeds

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

use crate::coercion::{coerce, stringify};
use crate::dsl::{Filter, FormatSpec, FormatType, Mapping, OutputMode, OutputSpec, ToDef, WriteMode};
use crate::error::{PipelineResult, RecordError, RecordResult, StoreError};
use crate::models::{FieldType, Record};
use crate::parser::{write_csv, write_json};
use crate::registry::EntityTypeRegistry;
use crate::store::{EntityStore, EntityTarget};

// =============================================================================
// Format destination
// =============================================================================

/// Serialized output of a `format` destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    /// Index of the step that produced it
    pub step: usize,
    pub mode: OutputMode,
    pub format_type: FormatType,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub body: String,
    pub rows: usize,
    /// Where a download was written, when the run saves downloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<String>,
}

/// Row buffer of one `format` destination.
#[derive(Debug, Clone)]
pub struct FormatSink {
    step: usize,
    output: OutputSpec,
    format: FormatSpec,
    mapping: Mapping,
    rows: Vec<Record>,
}

impl FormatSink {
    pub fn new(step: usize, output: OutputSpec, format: FormatSpec, mapping: Mapping) -> Self {
        Self {
            step,
            output,
            format,
            mapping,
            rows: Vec::new(),
        }
    }

    /// Build the sink of a step whose destination is `format`.
    pub fn for_step(step: usize, to: &ToDef) -> Option<Self> {
        match to {
            ToDef::Format { output, format, mapping } => Some(Self::new(
                step,
                output.clone(),
                format.clone(),
                mapping.clone(),
            )),
            _ => None,
        }
    }

    /// Map a row to its external names and buffer it.
    pub fn push(&mut self, row: &Record) {
        self.rows.push(self.mapping.rename(row));
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serialize the buffered rows.
    pub fn finish(self) -> PipelineResult<RunOutput> {
        let (bytes, content_type) = match self.format.format_type {
            FormatType::Csv => (write_csv(&self.rows, &self.format.options)?, "text/csv"),
            FormatType::Json => (write_json(&self.rows)?, "application/json"),
        };
        let body = String::from_utf8_lossy(&bytes).into_owned();

        let default_name = || format!("step-{}.{}", self.step, self.format.format_type.as_str());
        let file_name = match (self.output.mode, self.output.file_name.as_deref()) {
            (_, Some(name)) => Some(bare_file_name(name).unwrap_or_else(default_name)),
            (OutputMode::Download, None) => Some(default_name()),
            (OutputMode::Api, None) => None,
        };

        Ok(RunOutput {
            step: self.step,
            mode: self.output.mode,
            format_type: self.format.format_type,
            content_type: content_type.to_string(),
            file_name,
            body,
            rows: self.rows.len(),
            saved_to: None,
        })
    }
}

/// Final component of an author-supplied file name, if it has one.
pub fn bare_file_name(name: &str) -> Option<String> {
    Path::new(name.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
}

// =============================================================================
// Entity destination
// =============================================================================

/// Effect of one entity write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Created(Uuid),
    Updated(usize),
}

/// Writes rows to the entity store.
pub struct EntityWriter<'a> {
    registry: &'a dyn EntityTypeRegistry,
    store: &'a dyn EntityStore,
}

impl<'a> EntityWriter<'a> {
    pub fn new(registry: &'a dyn EntityTypeRegistry, store: &'a dyn EntityStore) -> Self {
        Self { registry, store }
    }

    /// Coerce the mapped fields of `row` and create or update an entity.
    ///
    /// Destinations other than `entity` are not written and yield `None`.
    pub fn write(&self, to: &ToDef, row: &Record) -> RecordResult<Option<WriteOutcome>> {
        let (entity_type, path, mode, identify, update_key, mapping) = match to {
            ToDef::Entity {
                entity_definition,
                path,
                mode,
                identify,
                update_key,
                mapping,
            } => (entity_definition, path, *mode, identify, update_key, mapping),
            _ => return Ok(None),
        };

        let fields = self.coerce_fields(entity_type, mapping, row, mode)?;

        let outcome = match mode {
            WriteMode::Create => self
                .store
                .create_entity(entity_type, path, fields)
                .map(WriteOutcome::Created),
            WriteMode::Update => {
                let target = update_target(identify.as_ref(), update_key.as_deref(), &fields)?;
                self.store
                    .update_entity(entity_type, &target, fields)
                    .map(WriteOutcome::Updated)
            }
        };
        outcome.map(Some).map_err(write_error)
    }

    /// `destination <- internal` renaming with per-field coercion.
    ///
    /// Updates only carry the fields present in the row; explicit nulls are kept.
    fn coerce_fields(
        &self,
        entity_type: &str,
        mapping: &Mapping,
        row: &Record,
        mode: WriteMode,
    ) -> RecordResult<Record> {
        let definition = self
            .registry
            .definition(entity_type)
            .ok_or_else(|| RecordError::WriteRejected(format!("Unknown entity type '{}'", entity_type)))?;

        let mut fields = Record::new();
        for (destination, internal) in mapping.iter() {
            let field_type = definition
                .field(destination)
                .map(|f| f.field_type.clone())
                .unwrap_or(FieldType::String);
            let raw = match row.get(internal) {
                Some(value) => value,
                // Absent from the row: an update keeps the stored value
                None if mode == WriteMode::Update => continue,
                None => &Value::Null,
            };
            fields.insert(destination.to_string(), coerce(raw, &field_type));
        }

        for field in definition.fields.iter().filter(|f| f.required) {
            let missing = match fields.get(&field.name) {
                Some(Value::Null) => true,
                Some(_) => false,
                None => mode == WriteMode::Create,
            };
            if missing {
                return Err(RecordError::RequiredField {
                    field: field.name.clone(),
                    field_type: field.field_type.to_string(),
                });
            }
        }
        Ok(fields)
    }
}

/// Entities an update applies to: the `identify` filter, else
/// `update_key = <row value>`.
fn update_target(
    identify: Option<&Filter>,
    update_key: Option<&str>,
    fields: &Record,
) -> RecordResult<EntityTarget> {
    if let Some(filter) = identify {
        return Ok(EntityTarget::Filter(filter.clone()));
    }
    let key = update_key
        .ok_or_else(|| RecordError::Unidentified("neither identify nor update_key is set".into()))?;
    match fields.get(key) {
        Some(value) if !value.is_null() => {
            Ok(EntityTarget::Filter(Filter::eq(key, &stringify(value))))
        }
        _ => Err(RecordError::Unidentified(format!(
            "update key '{}' has no value",
            key
        ))),
    }
}

fn write_error(e: StoreError) -> RecordError {
    match e {
        StoreError::NotFound(target) => RecordError::Unidentified(format!("no entity matched {}", target)),
        other => RecordError::WriteRejected(other.to_string()),
    }
}

// =============================================================================
// Next-step destination
// =============================================================================

/// Row as seen by the receiving step, before its own source mapping.
pub fn forward_row(to: &ToDef, row: &Record) -> Record {
    to.mapping().rename(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityDefinition, FieldDef};
    use crate::registry::RegistrySnapshot;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> RegistrySnapshot {
        RegistrySnapshot::new().with_definition(
            EntityDefinition::new("product")
                .with_field(FieldDef::new("sku", FieldType::String).required())
                .with_field(FieldDef::new("price", FieldType::Float))
                .with_field(FieldDef::new("active", FieldType::Boolean)),
        )
    }

    fn row(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn to_entity(mode: WriteMode, update_key: Option<&str>) -> ToDef {
        ToDef::Entity {
            entity_definition: "product".into(),
            path: "/catalog".into(),
            mode,
            identify: None,
            update_key: update_key.map(str::to_string),
            mapping: Mapping::new()
                .with("sku", "code")
                .with("price", "amount")
                .with("active", "on_sale"),
        }
    }

    #[test]
    fn test_format_sink_json_download() {
        let to: ToDef = serde_json::from_value(json!({
            "type": "format",
            "output": { "mode": "download" },
            "format": { "format_type": "json" },
            "mapping": { "price": "Price" }
        }))
        .unwrap();

        let mut sink = FormatSink::for_step(0, &to).unwrap();
        sink.push(&row(json!({ "price": 10, "internal": "x" })));
        let output = sink.finish().unwrap();

        assert_eq!(output.body, r#"[{"Price":10}]"#);
        assert_eq!(output.content_type, "application/json");
        assert_eq!(output.file_name.as_deref(), Some("step-0.json"));
        assert_eq!(output.rows, 1);
    }

    #[test]
    fn test_download_names_keep_the_final_component() {
        let to = |name: &str| ToDef::Format {
            output: OutputSpec { mode: OutputMode::Download, file_name: Some(name.into()) },
            format: FormatSpec::csv(),
            mapping: Mapping::new().with("price", "price"),
        };

        let output = FormatSink::for_step(2, &to("exports/prices.csv")).unwrap().finish().unwrap();
        assert_eq!(output.file_name.as_deref(), Some("prices.csv"));

        let output = FormatSink::for_step(2, &to("..")).unwrap().finish().unwrap();
        assert_eq!(output.file_name.as_deref(), Some("step-2.csv"));

        assert_eq!(bare_file_name("/tmp/"), Some("tmp".into()));
        assert_eq!(bare_file_name(" "), None);
    }

    #[test]
    fn test_entity_create_coerces_fields() {
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));
        let writer = EntityWriter::new(&registry, &store);

        let outcome = writer
            .write(
                &to_entity(WriteMode::Create, None),
                &row(json!({ "code": 42, "amount": "9.5", "on_sale": "yes" })),
            )
            .unwrap();
        assert!(matches!(outcome, Some(WriteOutcome::Created(_))));

        let stored = &store.all("product").unwrap()[0];
        assert_eq!(stored.fields["sku"], json!("42"));
        assert_eq!(stored.fields["price"], json!(9.5));
        assert_eq!(stored.fields["active"], json!(true));
        assert_eq!(stored.path, "/catalog");
    }

    #[test]
    fn test_required_field_coerced_to_null_fails() {
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));
        let writer = EntityWriter::new(&registry, &store);

        let err = writer
            .write(&to_entity(WriteMode::Create, None), &row(json!({ "code": "" })))
            .unwrap_err();
        assert!(matches!(err, RecordError::RequiredField { field, .. } if field == "sku"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_by_key_and_by_identify() {
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));
        let writer = EntityWriter::new(&registry, &store);
        writer
            .write(&to_entity(WriteMode::Create, None), &row(json!({ "code": "A1", "amount": 1 })))
            .unwrap();

        let outcome = writer
            .write(
                &to_entity(WriteMode::Update, Some("sku")),
                &row(json!({ "code": "A1", "amount": 2 })),
            )
            .unwrap();
        assert_eq!(outcome, Some(WriteOutcome::Updated(1)));

        let err = writer
            .write(
                &to_entity(WriteMode::Update, Some("sku")),
                &row(json!({ "code": "Z9", "amount": 2 })),
            )
            .unwrap_err();
        assert!(matches!(err, RecordError::Unidentified(_)));

        let identify = ToDef::Entity {
            entity_definition: "product".into(),
            path: "/".into(),
            mode: WriteMode::Update,
            identify: Some(Filter::eq("sku", "A1")),
            update_key: None,
            mapping: Mapping::new().with("price", "amount"),
        };
        writer.write(&identify, &row(json!({ "amount": "7" }))).unwrap();
        assert_eq!(store.all("product").unwrap()[0].fields["price"], json!(7.0));
    }

    #[test]
    fn test_update_keeps_fields_absent_from_row() {
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));
        let writer = EntityWriter::new(&registry, &store);
        writer
            .write(
                &to_entity(WriteMode::Create, None),
                &row(json!({ "code": "A1", "amount": 1, "on_sale": "yes" })),
            )
            .unwrap();

        let update = to_entity(WriteMode::Update, Some("sku"));
        writer.write(&update, &row(json!({ "code": "A1", "amount": "2.5" }))).unwrap();
        let stored = &store.all("product").unwrap()[0];
        assert_eq!(stored.fields["price"], json!(2.5));
        assert_eq!(stored.fields["active"], json!(true));

        writer
            .write(&update, &row(json!({ "code": "A1", "on_sale": null })))
            .unwrap();
        let stored = &store.all("product").unwrap()[0];
        assert_eq!(stored.fields["price"], json!(2.5));
        assert_eq!(stored.fields["active"], Value::Null);
    }

    #[test]
    fn test_forward_row() {
        let to = ToDef::NextStep {
            step: None,
            mapping: Mapping::new().with("total", "amount"),
        };
        assert_eq!(forward_row(&to, &row(json!({ "total": 3, "x": 1 }))), row(json!({ "amount": 3 })));

        let whole = ToDef::NextStep { step: None, mapping: Mapping::new() };
        assert_eq!(forward_row(&whole, &row(json!({ "x": 1 }))), row(json!({ "x": 1 })));
    }
}
