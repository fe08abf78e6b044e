//! Authoring-boundary cleanup of raw JSON steps.
//!
//! Editors send half-filled steps: blank mapping rows, an `output` left over
//! on an entity destination, no format yet. Sanitizing strips illegal field
//! combinations and injects defaults so that validation sees the step the
//! author meant. Nothing here decides validity.

use serde_json::{json, Map, Value};

/// Sanitize every step of a raw step list.
pub fn sanitize_steps(steps: &[Value]) -> Vec<Value> {
    steps.iter().map(sanitize_step).collect()
}

/// Sanitize a single raw step. Non-object input is returned unchanged.
pub fn sanitize_step(raw: &Value) -> Value {
    let mut step = match raw.as_object() {
        Some(obj) => obj.clone(),
        None => return raw.clone(),
    };

    if let Some(Value::Object(from)) = step.get_mut("from") {
        sanitize_from(from);
    }
    if let Some(Value::Object(to)) = step.get_mut("to") {
        sanitize_to(to);
    }
    if matches!(step.get("transform"), None | Some(Value::Null)) {
        step.insert("transform".into(), json!({ "type": "none" }));
    }

    Value::Object(step)
}

fn sanitize_from(from: &mut Map<String, Value>) {
    drop_nulls(from);
    clean_mapping(from);

    if from.get("type").and_then(Value::as_str) != Some("format") {
        return;
    }

    let mut inferred = "csv";
    if let Some(Value::Object(source)) = from.get_mut("source") {
        match source.get("source_type").and_then(Value::as_str) {
            Some("api") | Some("entity") => {
                inferred = "json";
                if let Some(Value::Object(config)) = source.get_mut("config") {
                    drop_nulls(config);
                }
                if matches!(source.get("config"), None | Some(Value::Null)) {
                    source.insert("config".into(), json!({}));
                }
            }
            Some("uri") => {
                if let Some(Value::Object(config)) = source.get_mut("config") {
                    drop_nulls(config);
                }
                let uri = source
                    .get("config")
                    .and_then(|c| c.get("uri"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if uri.to_lowercase().split(['?', '#']).next().unwrap_or("").ends_with(".json") {
                    inferred = "json";
                }
            }
            _ => {}
        }
    }

    if matches!(from.get("format"), None | Some(Value::Null)) {
        from.insert("format".into(), json!({ "format_type": inferred, "options": {} }));
    }
}

fn sanitize_to(to: &mut Map<String, Value>) {
    drop_nulls(to);
    clean_mapping(to);

    match to.get("type").and_then(Value::as_str) {
        Some("entity") => {
            to.remove("output");
            to.remove("format");
            if to.get("mode").and_then(Value::as_str) == Some("create") {
                to.remove("identify");
                to.remove("update_key");
            }
            if to.get("update_key").and_then(Value::as_str).is_some_and(|k| k.trim().is_empty()) {
                to.remove("update_key");
            }
        }
        Some("format") => {
            if matches!(to.get("format"), None | Some(Value::Null)) {
                to.insert("format".into(), json!({ "format_type": "json", "options": {} }));
            }
        }
        _ => {}
    }
}

/// Remove optional fields explicitly sent as null.
fn drop_nulls(def: &mut Map<String, Value>) {
    def.retain(|_, v| !v.is_null());
}

/// Ensure a mapping object exists and holds no blank keys or values.
fn clean_mapping(def: &mut Map<String, Value>) {
    let cleaned: Map<String, Value> = match def.get("mapping") {
        Some(Value::Object(mapping)) => mapping
            .iter()
            .filter(|(k, v)| {
                !k.trim().is_empty() && v.as_str().is_some_and(|s| !s.trim().is_empty())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Some(Value::Null) | None => Map::new(),
        // Wrong shape: leave it for the structural check to report.
        Some(_) => return,
    };
    def.insert("mapping".into(), Value::Object(cleaned));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_stripped_from_entity_destination() {
        let step = sanitize_step(&json!({
            "from": { "type": "entity", "entity_definition": "product" },
            "to": {
                "type": "entity",
                "entity_definition": "product",
                "path": "/",
                "mode": "create",
                "identify": { "field": "sku", "value": "1" },
                "output": { "mode": "api" },
                "mapping": { "title": "title" }
            }
        }));

        assert!(step["to"].get("output").is_none());
        assert!(step["to"].get("identify").is_none());
        assert_eq!(step["transform"]["type"], "none");
        assert_eq!(step["from"]["mapping"], json!({}));
    }

    #[test]
    fn test_defaults_injected() {
        let step = sanitize_step(&json!({
            "from": {
                "type": "format",
                "source": { "source_type": "uri", "config": { "uri": "https://x/items.JSON?page=2" } }
            },
            "to": { "type": "format", "output": { "mode": "api" } }
        }));

        assert_eq!(step["from"]["format"]["format_type"], "json");
        assert_eq!(step["to"]["format"]["format_type"], "json");
        assert_eq!(step["to"]["mapping"], json!({}));
    }

    #[test]
    fn test_api_source_gets_empty_config() {
        let step = sanitize_step(&json!({
            "from": { "type": "format", "source": { "source_type": "api" } },
            "to": { "type": "next_step" }
        }));
        assert_eq!(step["from"]["source"]["config"], json!({}));
    }

    #[test]
    fn test_blank_mapping_rows_removed() {
        let step = sanitize_step(&json!({
            "from": { "type": "entity", "entity_definition": "a", "mapping": { "": "x", "b": "", "c": "d" } },
            "to": { "type": "next_step" }
        }));
        assert_eq!(step["from"]["mapping"], json!({ "c": "d" }));
    }
}
