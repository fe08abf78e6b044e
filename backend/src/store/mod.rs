//! Entity store contract and an in-memory implementation.
//!
//! The pipeline reads entities through [`EntityStore::query_by_filter`] and
//! writes them through `create_entity` / `update_entity`. [`MemoryStore`]
//! backs the CLI, the HTTP server and the tests.

use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::dsl::Filter;
use crate::error::{StoreError, StoreResult};
use crate::models::{EntityRecord, Record};
use crate::registry::EntityTypeRegistry;
use crate::transform::ExternalLookup;

/// Which entities an update applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityTarget {
    Uuid(Uuid),
    Filter(Filter),
}

impl std::fmt::Display for EntityTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityTarget::Uuid(uuid) => write!(f, "uuid = {}", uuid),
            EntityTarget::Filter(filter) => {
                write!(f, "{} {:?} '{}'", filter.field, filter.operator, filter.value)
            }
        }
    }
}

/// Persistence of dynamic entities.
pub trait EntityStore: Send + Sync {
    /// Entities of a type, optionally restricted by a filter.
    fn query_by_filter(
        &self,
        entity_type: &str,
        filter: Option<&Filter>,
    ) -> StoreResult<Vec<EntityRecord>>;

    /// Create an entity and return its uuid.
    fn create_entity(&self, entity_type: &str, path: &str, fields: Record) -> StoreResult<Uuid>;

    /// Merge `fields` into every entity matched by `target`.
    ///
    /// Returns the number of updated entities; matching nothing is
    /// [`StoreError::NotFound`].
    fn update_entity(
        &self,
        entity_type: &str,
        target: &EntityTarget,
        fields: Record,
    ) -> StoreResult<usize>;
}

/// Thread-safe in-memory store checked against a registry.
pub struct MemoryStore {
    registry: Arc<dyn EntityTypeRegistry>,
    entities: RwLock<Vec<EntityRecord>>,
}

impl MemoryStore {
    pub fn new(registry: Arc<dyn EntityTypeRegistry>) -> Self {
        Self {
            registry,
            entities: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of all entities of a type.
    pub fn all(&self, entity_type: &str) -> StoreResult<Vec<EntityRecord>> {
        self.query_by_filter(entity_type, None)
    }

    /// Number of stored entities, all types.
    pub fn len(&self) -> usize {
        self.entities.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject unknown types, undefined fields and missing required fields.
    fn check_fields(&self, entity_type: &str, fields: &Record, creating: bool) -> StoreResult<()> {
        let definition = self
            .registry
            .definition(entity_type)
            .ok_or_else(|| StoreError::UnknownType(entity_type.to_string()))?;

        for name in fields.keys() {
            if definition.field(name).is_none() {
                return Err(StoreError::UnknownField {
                    entity_type: entity_type.to_string(),
                    field: name.clone(),
                });
            }
        }

        for field in definition.fields.iter().filter(|f| f.required) {
            let missing = match fields.get(&field.name) {
                Some(Value::Null) => true,
                Some(_) => false,
                None => creating,
            };
            if missing {
                return Err(StoreError::MissingRequired(field.name.clone()));
            }
        }
        Ok(())
    }
}

fn matches(record: &EntityRecord, entity_type: &str, filter: Option<&Filter>) -> bool {
    record.entity_type == entity_type
        && filter.map_or(true, |f| f.matches(record.get(&f.field).as_ref()))
}

impl EntityStore for MemoryStore {
    fn query_by_filter(
        &self,
        entity_type: &str,
        filter: Option<&Filter>,
    ) -> StoreResult<Vec<EntityRecord>> {
        if !self.registry.entity_exists(entity_type) {
            return Err(StoreError::UnknownType(entity_type.to_string()));
        }
        if let Some(f) = filter {
            if !self.registry.readable_field(entity_type, &f.field) {
                return Err(StoreError::InvalidFilter(format!(
                    "'{}' is not a field of '{}'",
                    f.field, entity_type
                )));
            }
        }

        let entities = self.entities.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entities
            .iter()
            .filter(|r| matches(r, entity_type, filter))
            .cloned()
            .collect())
    }

    fn create_entity(&self, entity_type: &str, path: &str, fields: Record) -> StoreResult<Uuid> {
        self.check_fields(entity_type, &fields, true)?;

        let now = Utc::now();
        let record = EntityRecord {
            uuid: Uuid::new_v4(),
            entity_type: entity_type.to_string(),
            path: path.to_string(),
            created_at: now,
            updated_at: now,
            fields,
        };
        let uuid = record.uuid;

        self.entities
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .push(record);
        Ok(uuid)
    }

    fn update_entity(
        &self,
        entity_type: &str,
        target: &EntityTarget,
        fields: Record,
    ) -> StoreResult<usize> {
        self.check_fields(entity_type, &fields, false)?;

        let mut entities = self.entities.write().map_err(|_| StoreError::Poisoned)?;
        let now = Utc::now();
        let mut updated = 0;

        for record in entities.iter_mut() {
            let hit = match target {
                EntityTarget::Uuid(uuid) => record.entity_type == entity_type && record.uuid == *uuid,
                EntityTarget::Filter(filter) => matches(record, entity_type, Some(filter)),
            };
            if hit {
                for (name, value) in &fields {
                    record.fields.insert(name.clone(), value.clone());
                }
                record.updated_at = now;
                updated += 1;
            }
        }

        if updated == 0 {
            return Err(StoreError::NotFound(target.to_string()));
        }
        Ok(updated)
    }
}

/// [`ExternalLookup`] over an entity store: first match wins.
pub struct StoreLookup<'a> {
    store: &'a dyn EntityStore,
}

impl<'a> StoreLookup<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self { store }
    }
}

impl ExternalLookup for StoreLookup<'_> {
    fn lookup(&self, entity_definition: &str, filter: &Filter, field: &str) -> Option<Value> {
        let found = self.store.query_by_filter(entity_definition, Some(filter)).ok()?;
        found.first().and_then(|r| r.get(field))
    }
}
