//! Semantic rules for a typed step.

use crate::dsl::{
    FormatOptions, FormatSpec, FormatType, FromDef, Mapping, Operand, SourceConfig, Step,
    StringOperand, ToDef, Transform, WriteMode,
};
use crate::models::is_system_field;
use crate::parser::encoding_for_label;
use crate::registry::EntityTypeRegistry;
use crate::source::is_supported_uri;

use super::{error_codes, Violation};

/// Semantic checks of the steps of one list.
pub struct StepRules<'a> {
    registry: &'a dyn EntityTypeRegistry,
    step_count: usize,
}

impl<'a> StepRules<'a> {
    pub fn new(registry: &'a dyn EntityTypeRegistry, step_count: usize) -> Self {
        Self { registry, step_count }
    }

    /// All violations of step `index`.
    pub fn check(&self, index: usize, step: &Step) -> Vec<Violation> {
        let mut violations = Vec::new();
        self.check_from(&step.from, &mut violations);
        self.check_transform(&step.transform, step.from.mapping(), &mut violations);
        self.check_to(index, &step.to, &mut violations);
        violations.into_iter().map(|v| v.at_step(index)).collect()
    }

    // =========================================================================
    // from
    // =========================================================================

    fn check_from(&self, from: &FromDef, out: &mut Vec<Violation>) {
        check_mapping_entries("from.mapping", from.mapping(), out);

        match from {
            FromDef::Entity { entity_definition, filter, mapping } => {
                if self.check_entity("from.entity_definition", entity_definition, out) {
                    if let Some(filter) = filter {
                        self.check_readable("from.filter.field", entity_definition, &filter.field, out);
                    }
                    for key in mapping.keys() {
                        self.check_readable(&format!("from.mapping.{}", key), entity_definition, key, out);
                    }
                }
            }

            FromDef::Format { source, format, mapping } => {
                match source {
                    SourceConfig::Uri(uri) => {
                        if uri.uri.trim().is_empty() {
                            out.push(Violation::new(
                                "from.source.config.uri",
                                error_codes::REQUIRED,
                                "uri is required",
                            ));
                        } else if !is_supported_uri(&uri.uri) {
                            out.push(Violation::new(
                                "from.source.config.uri",
                                error_codes::UNSUPPORTED_URI,
                                format!("Unsupported uri '{}': use http, https, file or a path", uri.uri),
                            ));
                        }
                    }
                    SourceConfig::Api(api) => {
                        if let Some(endpoint) = &api.endpoint {
                            if !is_supported_uri(endpoint) {
                                out.push(Violation::new(
                                    "from.source.config.endpoint",
                                    error_codes::UNSUPPORTED_URI,
                                    format!("Unsupported endpoint '{}'", endpoint),
                                ));
                            }
                        }
                    }
                    SourceConfig::Entity(entity) => {
                        let field = "from.source.config.entity_definition";
                        if self.check_entity(field, &entity.entity_definition, out) {
                            if let Some(filter) = &entity.filter {
                                self.check_readable(
                                    "from.source.config.filter.field",
                                    &entity.entity_definition,
                                    &filter.field,
                                    out,
                                );
                            }
                            for key in mapping.keys() {
                                self.check_readable(
                                    &format!("from.mapping.{}", key),
                                    &entity.entity_definition,
                                    key,
                                    out,
                                );
                            }
                        }
                    }
                }
                check_format("from.format", format, out);
            }
        }
    }

    // =========================================================================
    // transform
    // =========================================================================

    fn check_transform(&self, transform: &Transform, source_mapping: &Mapping, out: &mut Vec<Violation>) {
        // An empty source mapping passes every field through, so any name may exist.
        let available = |field: &str| source_mapping.is_empty() || source_mapping.values().any(|v| v == field);

        match transform {
            Transform::None => {}

            Transform::Arithmetic { target, left, right, .. } => {
                check_target(target, out);
                for (side, operand) in [("left", left), ("right", right)] {
                    let path = format!("transform.{}", side);
                    match operand {
                        Operand::Const { .. } => {}
                        Operand::Field { field } => check_operand_field(&path, field, &available, out),
                        Operand::ExternalEntityField { entity_definition, filter, field } => {
                            let entity_path = format!("{}.entity_definition", path);
                            if self.check_entity(&entity_path, entity_definition, out) {
                                self.check_readable(
                                    &format!("{}.filter.field", path),
                                    entity_definition,
                                    &filter.field,
                                    out,
                                );
                                self.check_readable(&format!("{}.field", path), entity_definition, field, out);
                            }
                        }
                    }
                }
            }

            Transform::Concat { target, left, right, .. } => {
                check_target(target, out);
                for (side, operand) in [("left", left), ("right", right)] {
                    if let StringOperand::Field { field } = operand {
                        check_operand_field(&format!("transform.{}", side), field, &available, out);
                    }
                }
            }
        }
    }

    // =========================================================================
    // to
    // =========================================================================

    fn check_to(&self, index: usize, to: &ToDef, out: &mut Vec<Violation>) {
        check_mapping_entries("to.mapping", to.mapping(), out);

        match to {
            ToDef::Format { output, format, mapping } => {
                require_mapping(mapping, out);
                check_format("to.format", format, out);
                if let Some(name) = &output.file_name {
                    check_file_name(name, out);
                }
            }

            ToDef::Entity {
                entity_definition,
                mode,
                identify,
                update_key,
                mapping,
                ..
            } => {
                require_mapping(mapping, out);
                let known = self.check_entity("to.entity_definition", entity_definition, out);

                if known {
                    for key in mapping.keys().filter(|k| !k.trim().is_empty()) {
                        let path = format!("to.mapping.{}", key);
                        if is_system_field(key) {
                            out.push(Violation::new(
                                path,
                                error_codes::SYSTEM_FIELD,
                                format!("'{}' is a system field and cannot be mapped", key),
                            ));
                        } else if !self.registry.field_exists(entity_definition, key) {
                            out.push(unknown_field(path, entity_definition, key));
                        }
                    }
                }

                if *mode == WriteMode::Update {
                    if identify.is_none() && update_key.is_none() {
                        out.push(Violation::new(
                            "to.update_key",
                            error_codes::MISSING_IDENTIFIER,
                            "update mode requires identify or update_key",
                        ));
                    }
                    if let (Some(key), true) = (update_key, known) {
                        if is_system_field(key) {
                            out.push(Violation::new(
                                "to.update_key",
                                error_codes::SYSTEM_FIELD,
                                format!("update_key '{}' is a system field", key),
                            ));
                        } else if !self.registry.field_exists(entity_definition, key) {
                            out.push(unknown_field("to.update_key", entity_definition, key));
                        } else if !mapping.contains_key(key) {
                            out.push(Violation::new(
                                "to.update_key",
                                error_codes::INVALID_MAPPING,
                                format!("update_key '{}' must be mapped", key),
                            ));
                        }
                    }
                    if let (Some(filter), true) = (identify, known) {
                        self.check_readable("to.identify.field", entity_definition, &filter.field, out);
                    }
                }
            }

            ToDef::NextStep { .. } => {
                if let Some(target) = to.forward_target(index) {
                    if target <= index || target >= self.step_count {
                        out.push(Violation::new(
                            "to.step",
                            error_codes::INVALID_STEP_REFERENCE,
                            format!(
                                "next_step must point to a later step (got {}, {} step(s) in list)",
                                target, self.step_count
                            ),
                        ));
                    }
                }
            }
        }
    }

    // =========================================================================
    // helpers
    // =========================================================================

    /// Push a violation when the entity type is unknown; returns whether it exists.
    fn check_entity(&self, path: &str, entity_type: &str, out: &mut Vec<Violation>) -> bool {
        if entity_type.trim().is_empty() {
            out.push(Violation::new(path, error_codes::REQUIRED, "entity_definition is required"));
            return false;
        }
        if !self.registry.entity_exists(entity_type) {
            out.push(Violation::new(
                path,
                error_codes::UNKNOWN_ENTITY,
                format!("Entity type '{}' does not exist", entity_type),
            ));
            return false;
        }
        true
    }

    fn check_readable(&self, path: &str, entity_type: &str, field: &str, out: &mut Vec<Violation>) {
        if !self.registry.readable_field(entity_type, field) {
            out.push(unknown_field(path, entity_type, field));
        }
    }
}

fn unknown_field(path: impl Into<String>, entity_type: &str, field: &str) -> Violation {
    Violation::new(
        path,
        error_codes::UNKNOWN_FIELD,
        format!("Field '{}' does not exist on '{}'", field, entity_type),
    )
}

fn require_mapping(mapping: &Mapping, out: &mut Vec<Violation>) {
    if mapping.is_empty() {
        out.push(Violation::new(
            "to.mapping",
            error_codes::INVALID_MAPPING,
            "mapping must contain at least one field",
        ));
    }
}

fn check_mapping_entries(path: &str, mapping: &Mapping, out: &mut Vec<Violation>) {
    if mapping
        .iter()
        .any(|(k, v)| k.trim().is_empty() || v.trim().is_empty())
    {
        out.push(Violation::new(
            path,
            error_codes::INVALID_MAPPING,
            "mapping entries must have a non-empty key and value",
        ));
    }
}

/// Download names are bare file names: no directories, no parent references.
fn check_file_name(name: &str, out: &mut Vec<Violation>) {
    let trimmed = name.trim();
    let message = if trimmed.is_empty() {
        Some("file_name must not be blank".to_string())
    } else if trimmed.contains(['/', '\\']) || trimmed.contains("..") {
        Some(format!("file_name '{}' must not contain path separators or '..'", name))
    } else {
        None
    };
    if let Some(message) = message {
        out.push(Violation::new("to.output.file_name", error_codes::INVALID_FILE_NAME, message));
    }
}

fn check_target(target: &str, out: &mut Vec<Violation>) {
    if target.trim().is_empty() {
        out.push(Violation::new(
            "transform.target",
            error_codes::REQUIRED,
            "transform target is required",
        ));
    }
}

fn check_operand_field(
    path: &str,
    field: &str,
    available: &dyn Fn(&str) -> bool,
    out: &mut Vec<Violation>,
) {
    if field.trim().is_empty() {
        out.push(Violation::new(
            format!("{}.field", path),
            error_codes::REQUIRED,
            "operand field is required",
        ));
    } else if !available(field) {
        out.push(Violation::new(
            format!("{}.field", path),
            error_codes::UNAVAILABLE_FIELD,
            format!("Field '{}' is not produced by the source mapping", field),
        ));
    }
}

fn check_format(path: &str, format: &FormatSpec, out: &mut Vec<Violation>) {
    let FormatOptions {
        delimiter,
        quote,
        escape,
        encoding,
        ..
    } = &format.options;

    if format.format_type == FormatType::Csv {
        let single = [
            ("delimiter", Some(delimiter.as_str())),
            ("quote", quote.as_deref()),
            ("escape", escape.as_deref()),
        ];
        for (name, value) in single {
            if let Some(value) = value {
                if !matches!(value.as_bytes(), [b] if b.is_ascii()) {
                    out.push(Violation::new(
                        format!("{}.options.{}", path, name),
                        error_codes::INVALID_OPTION,
                        format!("{} must be a single ASCII character", name),
                    ));
                }
            }
        }
    }

    if let Some(label) = encoding {
        if encoding_for_label(label).is_none() {
            out.push(Violation::new(
                format!("{}.options.encoding", path),
                error_codes::INVALID_OPTION,
                format!("Unknown encoding '{}'", label),
            ));
        }
    }
}
