//! Step and workflow validation.
//!
//! Validation never fails: every rule runs and contributes zero or more
//! [`Violation`]s.
//!
//! 1. Structural: raw steps are sanitized, then each part (`from`,
//!    `transform`, `to`) is checked against the embedded JSON Schema
//!    (draft 7) before being decoded into the typed grammar.
//! 2. Semantic: entity and field references are resolved against an
//!    [`EntityTypeRegistry`], mappings and transforms are checked, and
//!    `next_step` references must point forward.
//! 3. Workflow: the cron schedule must be syntactically valid, and absent for
//!    workflows run on demand.
//!
//! # Example
//!
//! ```rust,ignore
//! use stepflow::validation::validate_raw;
//!
//! let report = validate_raw(&steps, &registry);
//! for violation in &report.violations {
//!     println!("step {:?} {}: {}", violation.step, violation.field, violation.message);
//! }
//! ```

mod rules;
mod workflow;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::dsl::schema::{check_part, STEP_PARTS};
use crate::dsl::{sanitize_step, Step};
use crate::registry::EntityTypeRegistry;

pub use rules::StepRules;
pub use workflow::{
    decode_workflow, is_valid_cron, schedulable, validate_workflow, validate_workflow_value,
};

/// Validation error codes
pub mod error_codes {
    /// Required value missing
    pub const REQUIRED: &str = "required";

    /// Step does not match the grammar
    pub const STRUCTURAL: &str = "structural";

    /// Entity type not in the registry
    pub const UNKNOWN_ENTITY: &str = "unknown_entity";

    /// Field not defined on the entity type
    pub const UNKNOWN_FIELD: &str = "unknown_field";

    /// Store-managed field used where a user field is expected
    pub const SYSTEM_FIELD: &str = "system_field";

    /// Update destination without `identify` or `update_key`
    pub const MISSING_IDENTIFIER: &str = "missing_identifier";

    /// Mapping without entries, or with blank entries
    pub const INVALID_MAPPING: &str = "invalid_mapping";

    /// `next_step` pointing backwards or past the end
    pub const INVALID_STEP_REFERENCE: &str = "invalid_step_reference";

    /// Format option out of range
    pub const INVALID_OPTION: &str = "invalid_option";

    /// Download file name with a directory or parent reference
    pub const INVALID_FILE_NAME: &str = "invalid_file_name";

    /// URI empty or with an unsupported scheme
    pub const UNSUPPORTED_URI: &str = "unsupported_uri";

    /// Operand references a field the step does not provide
    pub const UNAVAILABLE_FIELD: &str = "unavailable_field";

    /// Cron schedule on an on-demand workflow
    pub const CRON_FORBIDDEN: &str = "cron_forbidden";

    /// Cron expression that does not parse
    pub const INVALID_CRON: &str = "invalid_cron";
}

/// One validation problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Dotted path relative to the step, or `dsl` / `schedule_cron`
    pub field: String,
    pub message: String,
    pub code: String,
    /// Index of the offending step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
}

impl Violation {
    pub fn new(field: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.to_string(),
            step: None,
        }
    }

    pub fn at_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "steps[{}].{}: {} ({})", step, self.field, self.message, self.code),
            None => write!(f, "{}: {} ({})", self.field, self.message, self.code),
        }
    }
}

/// Outcome of a validation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }

    pub fn into_result(self) -> Result<(), Vec<Violation>> {
        if self.valid {
            Ok(())
        } else {
            Err(self.violations)
        }
    }
}

fn empty_list() -> Violation {
    Violation::new("dsl", error_codes::REQUIRED, "DSL steps are required")
}

/// Validate typed steps against a registry.
pub fn validate(steps: &[Step], registry: &dyn EntityTypeRegistry) -> Result<(), Vec<Violation>> {
    if steps.is_empty() {
        return Err(vec![empty_list()]);
    }

    let rules = StepRules::new(registry, steps.len());
    let violations: Vec<Violation> = steps
        .iter()
        .enumerate()
        .flat_map(|(i, step)| rules.check(i, step))
        .collect();

    ValidationReport::from_violations(violations).into_result()
}

/// Sanitize, structurally check and semantically validate raw JSON steps.
///
/// Steps that fail the structural check are not checked semantically; the
/// others still are.
pub fn validate_raw(steps: &[Value], registry: &dyn EntityTypeRegistry) -> ValidationReport {
    let (_, violations) = decode_steps(steps, registry);
    ValidationReport::from_violations(violations)
}

/// Decode raw steps, returning the ones that parsed and all violations.
pub(crate) fn decode_steps(
    steps: &[Value],
    registry: &dyn EntityTypeRegistry,
) -> (Vec<Step>, Vec<Violation>) {
    if steps.is_empty() {
        return (Vec::new(), vec![empty_list()]);
    }

    let rules = StepRules::new(registry, steps.len());
    let mut decoded = Vec::new();
    let mut violations = Vec::new();

    for (i, raw) in steps.iter().enumerate() {
        let structural = check_structure(raw);
        if !structural.is_empty() {
            violations.extend(structural.into_iter().map(|v| v.at_step(i)));
            continue;
        }

        match serde_json::from_value::<Step>(sanitize_step(raw)) {
            Ok(step) => {
                violations.extend(rules.check(i, &step));
                decoded.push(step);
            }
            Err(e) => violations.push(
                Violation::new("step", error_codes::STRUCTURAL, e.to_string()).at_step(i),
            ),
        }
    }

    (decoded, violations)
}

/// Schema violations of one raw step, after sanitizing.
fn check_structure(raw: &Value) -> Vec<Violation> {
    if !raw.is_object() {
        return vec![Violation::new("step", error_codes::STRUCTURAL, "Step must be an object")];
    }

    let step = sanitize_step(raw);
    let mut violations = Vec::new();
    for part in STEP_PARTS {
        match step.get(part) {
            None | Some(Value::Null) => violations.push(Violation::new(
                part,
                error_codes::REQUIRED,
                format!("'{}' is required", part),
            )),
            Some(value) => violations.extend(
                check_part(part, value)
                    .into_iter()
                    .map(|message| Violation::new(part, error_codes::STRUCTURAL, message)),
            ),
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityDefinition, FieldDef, FieldType};
    use crate::registry::RegistrySnapshot;
    use serde_json::json;

    fn registry() -> RegistrySnapshot {
        RegistrySnapshot::new().with_definition(
            EntityDefinition::new("product")
                .with_field(FieldDef::new("sku", FieldType::String).required())
                .with_field(FieldDef::new("price", FieldType::Float)),
        )
    }

    fn csv_to_product() -> Value {
        json!({
            "from": {
                "type": "format",
                "source": { "source_type": "uri", "config": { "uri": "data/products.csv" } },
                "format": { "format_type": "csv", "options": {} },
                "mapping": { "SKU": "sku", "Price": "price" }
            },
            "transform": { "type": "none" },
            "to": {
                "type": "entity",
                "entity_definition": "product",
                "path": "/catalog",
                "mode": "create",
                "mapping": { "sku": "sku", "price": "price" }
            }
        })
    }

    #[test]
    fn test_empty_list() {
        let err = validate(&[], &registry()).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].field, "dsl");
        assert!(err[0].message.contains("required"));

        let report = validate_raw(&[], &registry());
        assert!(!report.valid);
        assert_eq!(report.violations[0].field, "dsl");
    }

    #[test]
    fn test_valid_raw_step() {
        let report = validate_raw(&[csv_to_product()], &registry());
        assert!(report.valid, "{:?}", report.violations);
    }

    #[test]
    fn test_unknown_discriminator_is_structural() {
        let mut step = csv_to_product();
        step["to"]["type"] = json!("ftp");

        let report = validate_raw(&[step], &registry());
        assert!(!report.valid);
        assert!(report
            .violations
            .iter()
            .all(|v| v.code == error_codes::STRUCTURAL && v.field == "to" && v.step == Some(0)));
    }

    #[test]
    fn test_missing_from_is_required() {
        let mut step = csv_to_product();
        step.as_object_mut().unwrap().remove("from");

        let report = validate_raw(&[step], &registry());
        assert!(report
            .violations
            .iter()
            .any(|v| v.field == "from" && v.code == error_codes::REQUIRED));
    }

    #[test]
    fn test_output_on_entity_destination_is_sanitized_away() {
        let mut step = csv_to_product();
        step["to"]["output"] = json!({ "mode": "api" });
        step["to"]["update_key"] = json!(null);

        assert!(validate_raw(&[step], &registry()).valid);
    }

    #[test]
    fn test_semantic_errors_still_reported_for_other_steps() {
        let mut broken = csv_to_product();
        broken["from"]["type"] = json!("queue");
        let mut unknown = csv_to_product();
        unknown["to"]["entity_definition"] = json!("order");

        let report = validate_raw(&[broken, unknown], &registry());
        assert!(report.violations.iter().any(|v| v.step == Some(0)));
        assert!(report
            .violations
            .iter()
            .any(|v| v.step == Some(1) && v.code == error_codes::UNKNOWN_ENTITY));
    }

    #[test]
    fn test_violation_display() {
        let v = Violation::new("to.mapping", error_codes::INVALID_MAPPING, "empty").at_step(2);
        assert_eq!(v.to_string(), "steps[2].to.mapping: empty (invalid_mapping)");
    }
}
