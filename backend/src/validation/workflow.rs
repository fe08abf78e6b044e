//! Workflow-level rules: the step list plus the cron schedule.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::dsl::{sanitize_steps, Step, Workflow};
use crate::registry::EntityTypeRegistry;

use super::{decode_steps, error_codes, validate, ValidationReport, Violation};

/// One cron field: `*`, `?`, numbers or names, ranges, steps and lists.
static CRON_FIELD: Lazy<Regex> = Lazy::new(|| {
    let atom = r"(\*|\?|[0-9]+|[A-Za-z]{3})(-([0-9]+|[A-Za-z]{3}))?(/[0-9]+)?";
    Regex::new(&format!("^{atom}(,{atom})*$", atom = atom)).expect("Invalid cron pattern")
});

const CRON_MACROS: &[&str] = &[
    "@yearly", "@annually", "@monthly", "@weekly", "@daily", "@midnight", "@hourly",
];

/// Whether `expr` is a 5- or 6-field cron expression, or a macro such as `@daily`.
pub fn is_valid_cron(expr: &str) -> bool {
    let expr = expr.trim();
    if CRON_MACROS.contains(&expr.to_lowercase().as_str()) {
        return true;
    }
    let fields: Vec<&str> = expr.split_whitespace().collect();
    matches!(fields.len(), 5 | 6) && fields.iter().all(|f| CRON_FIELD.is_match(f))
}

fn check_schedule(workflow: &Workflow) -> Option<Violation> {
    let cron = workflow
        .schedule_cron
        .as_deref()
        .filter(|c| !c.trim().is_empty())?;

    if workflow.is_on_demand() {
        return Some(Violation::new(
            "schedule_cron",
            error_codes::CRON_FORBIDDEN,
            "Workflows started by an api source or answering an api caller cannot be scheduled",
        ));
    }
    if !is_valid_cron(cron) {
        return Some(Violation::new(
            "schedule_cron",
            error_codes::INVALID_CRON,
            format!("Invalid cron expression '{}'", cron),
        ));
    }
    None
}

/// Validate a typed workflow.
pub fn validate_workflow(workflow: &Workflow, registry: &dyn EntityTypeRegistry) -> ValidationReport {
    let mut violations = validate(&workflow.config.steps, registry).err().unwrap_or_default();
    violations.extend(check_schedule(workflow));
    ValidationReport::from_violations(violations)
}

/// Validate a raw workflow document, steps included.
///
/// The schedule is checked against the steps that decoded; a document that
/// is not a workflow at all yields a single structural violation.
pub fn validate_workflow_value(raw: &Value, registry: &dyn EntityTypeRegistry) -> ValidationReport {
    let raw_steps = match raw.pointer("/config/steps") {
        Some(Value::Array(steps)) => steps.clone(),
        Some(_) => {
            return ValidationReport::from_violations(vec![Violation::new(
                "config.steps",
                error_codes::STRUCTURAL,
                "config.steps must be an array",
            )])
        }
        None => Vec::new(),
    };

    let (steps, mut violations) = decode_steps(&raw_steps, registry);

    let mut shell = raw.clone();
    if let Some(config) = shell.get_mut("config") {
        config["steps"] = Value::Array(Vec::new());
    }
    match serde_json::from_value::<Workflow>(shell) {
        Ok(mut workflow) => {
            workflow.config.steps = steps;
            // Schedule rules only hold when every step decoded.
            if workflow.config.steps.len() == raw_steps.len() {
                violations.extend(check_schedule(&workflow));
            }
        }
        Err(e) => violations.push(Violation::new("workflow", error_codes::STRUCTURAL, e.to_string())),
    }

    ValidationReport::from_violations(violations)
}

/// Decode a raw workflow, sanitizing its steps first.
pub fn decode_workflow(raw: &Value) -> Result<Workflow, serde_json::Error> {
    let mut raw = raw.clone();
    if let Some(Value::Array(steps)) = raw.pointer("/config/steps") {
        let cleaned = sanitize_steps(steps);
        raw["config"]["steps"] = Value::Array(cleaned);
    }
    serde_json::from_value(raw)
}

/// Whether a typed step list could be scheduled at all.
pub fn schedulable(steps: &[Step]) -> bool {
    !Workflow::new("", steps.to_vec()).is_on_demand()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityDefinition, FieldDef, FieldType};
    use crate::registry::RegistrySnapshot;
    use serde_json::json;

    fn registry() -> RegistrySnapshot {
        RegistrySnapshot::new().with_definition(
            EntityDefinition::new("product").with_field(FieldDef::new("sku", FieldType::String)),
        )
    }

    fn workflow(source: Value, output_mode: &str, cron: Value) -> Value {
        json!({
            "name": "sync",
            "schedule_cron": cron,
            "config": {
                "steps": [{
                    "from": { "type": "format", "source": source, "mapping": { "sku": "sku" } },
                    "to": { "type": "format", "output": { "mode": output_mode }, "mapping": { "sku": "sku" } }
                }]
            }
        })
    }

    #[test]
    fn test_cron_syntax() {
        assert!(is_valid_cron("0 * * * *"));
        assert!(is_valid_cron("*/15 9-17 * * MON-FRI"));
        assert!(is_valid_cron("0 0 12 1,15 * ?"));
        assert!(is_valid_cron("@daily"));
        assert!(!is_valid_cron("every day"));
        assert!(!is_valid_cron("* * *"));
        assert!(!is_valid_cron("0 * * * * * *"));
    }

    #[test]
    fn test_push_source_forbids_cron() {
        let raw = workflow(json!({ "source_type": "api" }), "download", json!("0 * * * *"));
        let report = validate_workflow_value(&raw, &registry());

        assert!(!report.valid);
        assert_eq!(report.violations.len(), 1, "{:?}", report.violations);
        assert_eq!(report.violations[0].field, "schedule_cron");
        assert_eq!(report.violations[0].code, error_codes::CRON_FORBIDDEN);
    }

    #[test]
    fn test_api_response_forbids_cron() {
        let source = json!({ "source_type": "uri", "config": { "uri": "https://x/items.csv" } });
        let report = validate_workflow_value(&workflow(source.clone(), "api", json!("0 * * * *")), &registry());
        assert_eq!(report.violations[0].code, error_codes::CRON_FORBIDDEN);

        let report = validate_workflow_value(&workflow(source, "download", json!("0 * * * *")), &registry());
        assert!(report.valid, "{:?}", report.violations);
    }

    #[test]
    fn test_endpoint_source_can_be_scheduled() {
        let source = json!({ "source_type": "api", "config": { "endpoint": "https://x/feed" } });
        let raw = workflow(source, "download", json!("0 6 * * *"));
        assert!(validate_workflow_value(&raw, &registry()).valid);
    }

    #[test]
    fn test_invalid_cron_and_null_cron() {
        let source = json!({ "source_type": "uri", "config": { "uri": "items.csv" } });
        let report = validate_workflow_value(&workflow(source.clone(), "download", json!("whenever")), &registry());
        assert_eq!(report.violations[0].code, error_codes::INVALID_CRON);

        let report = validate_workflow_value(&workflow(source, "download", Value::Null), &registry());
        assert!(report.valid);
    }

    #[test]
    fn test_typed_workflow_and_sanitize() {
        let raw = workflow(json!({ "source_type": "api" }), "download", json!("0 * * * *"));
        let mut wf = decode_workflow(&raw).unwrap();

        let report = validate_workflow(&wf, &registry());
        assert_eq!(report.violations.len(), 1);
        assert!(!schedulable(&wf.config.steps));

        wf.sanitize();
        assert!(validate_workflow(&wf, &registry()).valid);
    }
}
