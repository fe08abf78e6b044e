//! Embedded JSON Schema of the step grammar.
//!
//! The schema is used twice: the validator checks raw steps against it part by
//! part, and [`preview_step_shape`] hands sub-schemas to form generators.

use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::HashMap;

static STEP_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/dsl-step.json"))
        .expect("Invalid embedded schema")
});

/// The full step schema (JSON Schema draft 7).
pub fn step_schema() -> &'static Value {
    &STEP_SCHEMA
}

/// Names accepted by [`preview_step_shape`].
pub const STEP_TYPES: &[&str] = &[
    "step",
    "from",
    "from.format",
    "from.entity",
    "to",
    "to.format",
    "to.entity",
    "to.next_step",
    "transform",
    "transform.none",
    "transform.arithmetic",
    "transform.concat",
    "operand",
    "string_operand",
    "filter",
    "format",
    "mapping",
];

/// Self-contained schema for one part of a step, e.g. `"to.entity"`.
pub fn preview_step_shape(step_type: &str) -> Option<Value> {
    if step_type == "step" {
        return Some(step_schema().clone());
    }
    let definition = step_type.replace('.', "_");
    step_schema()
        .get("definitions")?
        .get(&definition)
        .map(|_| part_schema(&definition))
}

fn part_schema(definition: &str) -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "allOf": [{ "$ref": format!("#/definitions/{}", definition) }],
        "definitions": step_schema()["definitions"].clone(),
    })
}

/// Top-level parts of a step, each checked on its own.
pub const STEP_PARTS: [&str; 3] = ["from", "transform", "to"];

/// Compiled validators of the step parts, built on first use.
static PART_VALIDATORS: Lazy<HashMap<&'static str, Result<Validator, String>>> = Lazy::new(|| {
    STEP_PARTS
        .into_iter()
        .map(|part| (part, compile_part(part)))
        .collect()
});

fn compile_part(part: &str) -> Result<Validator, String> {
    jsonschema::draft7::new(&part_schema(part)).map_err(|e| e.to_string())
}

fn part_validator(part: &str) -> Option<&'static Result<Validator, String>> {
    PART_VALIDATORS.get(part)
}

/// Check one top-level part (`from`, `transform`, `to`) of a raw step.
///
/// Returns one message per schema error; empty when the part is well formed.
pub fn check_part(part: &str, value: &Value) -> Vec<String> {
    let compiled;
    let validator = match part_validator(part) {
        Some(cached) => cached,
        None => {
            compiled = compile_part(part);
            &compiled
        }
    };
    match validator {
        Ok(validator) => validator.iter_errors(value).map(|e| e.to_string()).collect(),
        Err(e) => vec![format!("Invalid step schema: {}", e)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_known_shapes() {
        for step_type in STEP_TYPES {
            assert!(preview_step_shape(step_type).is_some(), "{}", step_type);
        }
        assert!(preview_step_shape("to.ftp").is_none());
    }

    #[test]
    fn test_check_part_accepts_valid_transform() {
        let transform = json!({
            "type": "arithmetic",
            "target": "total",
            "left": { "kind": "field", "field": "price" },
            "op": "add",
            "right": { "kind": "const", "value": 5 }
        });
        assert!(check_part("transform", &transform).is_empty());
    }

    #[test]
    fn test_part_validators_compiled_once() {
        for part in STEP_PARTS {
            let first = part_validator(part).unwrap();
            let second = part_validator(part).unwrap();
            assert!(std::ptr::eq(first, second), "{}", part);
            assert!(first.is_ok(), "{}", part);
        }
        assert!(part_validator("format").is_none());
        assert!(check_part("format", &json!({ "format_type": "csv" })).is_empty());
    }

    #[test]
    fn test_check_part_reports_unknown_discriminator() {
        let errors = check_part("to", &json!({ "type": "ftp" }));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ftp"));
    }

    #[test]
    fn test_entity_destination_rejects_output() {
        let to = json!({
            "type": "entity",
            "entity_definition": "product",
            "path": "/",
            "mode": "create",
            "mapping": { "title": "title" },
            "output": { "mode": "api" }
        });
        assert!(!check_part("to", &to).is_empty());
    }
}
