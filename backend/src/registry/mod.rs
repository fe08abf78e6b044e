//! Entity-definition registry.
//!
//! The validator and the entity destination consult the registry for type
//! names, field names and field types. [`RegistrySnapshot`] is an in-memory
//! view, optionally loaded from a directory of JSON definition files.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::logs::log_warning;
use crate::error::{RegistryError, RegistryResult};
use crate::models::{is_system_field, EntityDefinition, FieldType};

/// Directory where definitions are stored (relative to current dir)
pub const DEFAULT_REGISTRY_DIR: &str = ".stepflow/entities";

/// Read-only view of entity definitions.
pub trait EntityTypeRegistry: Send + Sync {
    /// Declared field types of an entity type, `None` if the type is unknown.
    fn list_field_types(&self, entity_type: &str) -> Option<HashMap<String, FieldType>>;

    fn entity_exists(&self, entity_type: &str) -> bool;

    /// Whether `field` is a user-defined field of `entity_type`.
    fn field_exists(&self, entity_type: &str, field: &str) -> bool;

    fn definition(&self, entity_type: &str) -> Option<&EntityDefinition>;

    /// Whether `field` can be read on `entity_type`, system fields included.
    fn readable_field(&self, entity_type: &str, field: &str) -> bool {
        is_system_field(field) || self.field_exists(entity_type, field)
    }
}

/// In-memory registry snapshot.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// Directory definitions are persisted to, if any
    registry_dir: Option<PathBuf>,
    /// Loaded definitions (name -> definition)
    definitions: HashMap<String, EntityDefinition>,
}

impl RegistrySnapshot {
    /// Empty registry with no backing directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry backed by `dir`, loading the definitions found there.
    ///
    /// Each `*.json` file holds one definition or an array of them. Files
    /// that do not parse are skipped with a warning.
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        let mut registry = Self {
            registry_dir: Some(dir.as_ref().to_path_buf()),
            definitions: HashMap::new(),
        };
        registry.load_all();
        registry
    }

    /// Add a definition in memory.
    pub fn with_definition(mut self, definition: EntityDefinition) -> Self {
        self.insert(definition);
        self
    }

    pub fn insert(&mut self, definition: EntityDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    fn load_all(&mut self) {
        let dir = match &self.registry_dir {
            Some(dir) if dir.exists() => dir.clone(),
            _ => return,
        };

        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) => {
                log_warning(format!("Cannot read registry {}: {}", dir.display(), e));
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                match Self::load_file(&path) {
                    Ok(definitions) => {
                        for definition in definitions {
                            self.insert(definition);
                        }
                    }
                    Err(e) => log_warning(format!("Skipping {}: {}", path.display(), e)),
                }
            }
        }
    }

    /// Parse one definition file.
    pub fn load_file(path: &Path) -> RegistryResult<Vec<EntityDefinition>> {
        let content = fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&content)?;
        let definitions: Vec<EntityDefinition> = if value.is_array() {
            serde_json::from_value(value)?
        } else {
            vec![serde_json::from_value(value)?]
        };

        for definition in &definitions {
            if definition.name.trim().is_empty() {
                return Err(RegistryError::InvalidDefinition("empty entity name".into()));
            }
            if let Some(field) = definition.fields.iter().find(|f| is_system_field(&f.name)) {
                return Err(RegistryError::InvalidDefinition(format!(
                    "'{}' redefines system field '{}'",
                    definition.name, field.name
                )));
            }
        }
        Ok(definitions)
    }

    /// Persist a definition to the backing directory and keep it in memory.
    pub fn save(&mut self, definition: EntityDefinition) -> RegistryResult<PathBuf> {
        let dir = self
            .registry_dir
            .clone()
            .ok_or_else(|| RegistryError::InvalidDefinition("registry has no directory".into()))?;
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.json", slug(&definition.name)));
        fs::write(&path, serde_json::to_string_pretty(&definition)?)?;

        self.insert(definition);
        Ok(path)
    }

    /// All definitions, sorted by name.
    pub fn list(&self) -> Vec<&EntityDefinition> {
        let mut all: Vec<_> = self.definitions.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn get(&self, name: &str) -> RegistryResult<&EntityDefinition> {
        self.definitions
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl EntityTypeRegistry for RegistrySnapshot {
    fn list_field_types(&self, entity_type: &str) -> Option<HashMap<String, FieldType>> {
        self.definitions.get(entity_type).map(|d| {
            d.fields
                .iter()
                .map(|f| (f.name.clone(), f.field_type.clone()))
                .collect()
        })
    }

    fn entity_exists(&self, entity_type: &str) -> bool {
        self.definitions.contains_key(entity_type)
    }

    fn field_exists(&self, entity_type: &str, field: &str) -> bool {
        self.definitions
            .get(entity_type)
            .is_some_and(|d| d.field(field).is_some())
    }

    fn definition(&self, entity_type: &str) -> Option<&EntityDefinition> {
        self.definitions.get(entity_type)
    }
}

/// File-name slug of a definition name
fn slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
