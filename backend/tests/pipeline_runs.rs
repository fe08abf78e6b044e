//! Whole runs against an in-memory store and a registry loaded from disk.

use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use stepflow::{
    decode_workflow, validate_workflow_value, ApiPayload, EntityStore, MemoryStore, Pipeline,
    RegistrySnapshot, RunRequest, RunState, RunTrigger,
};

fn registry_dir(dir: &Path) -> RegistrySnapshot {
    let definitions = json!([
        {
            "name": "product",
            "fields": [
                { "name": "sku", "type": "string", "required": true },
                { "name": "price", "type": "float", "required": true },
                { "name": "label", "type": "string" }
            ]
        },
        {
            "name": "currency",
            "fields": [
                { "name": "code", "type": "string", "required": true },
                { "name": "rate", "type": "float" }
            ]
        }
    ]);
    fs::write(dir.join("catalog.json"), definitions.to_string()).unwrap();
    RegistrySnapshot::with_dir(dir)
}

fn setup() -> (tempfile::TempDir, Arc<RegistrySnapshot>, MemoryStore) {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(registry_dir(dir.path()));
    let store = MemoryStore::new(registry.clone());
    (dir, registry, store)
}

fn workflow(steps: Value) -> Value {
    json!({ "name": "test", "config": { "steps": steps } })
}

#[tokio::test]
async fn csv_file_to_json_download() {
    let (dir, registry, store) = setup();
    let csv = dir.path().join("prices.csv");
    fs::write(&csv, "Price\n10\n").unwrap();

    let raw = workflow(json!([{
        "from": {
            "type": "format",
            "source": { "source_type": "uri", "config": { "uri": csv.display().to_string() } },
            "format": { "format_type": "csv", "options": { "has_header": true } },
            "mapping": { "Price": "price" }
        },
        "transform": { "type": "none" },
        "to": {
            "type": "format",
            "output": { "mode": "download" },
            "format": { "format_type": "json" },
            "mapping": { "price": "Price" }
        }
    }]));
    assert!(validate_workflow_value(&raw, registry.as_ref()).valid);

    let result = Pipeline::new(registry.as_ref(), &store)
        .run(&decode_workflow(&raw).unwrap(), RunRequest::manual())
        .await
        .unwrap();

    assert_eq!(result.status, RunState::Completed);
    assert_eq!(result.processed_items, 1);
    assert_eq!(result.outputs.len(), 1);
    assert_eq!(result.outputs[0].body, r#"[{"Price":10}]"#);
    assert_eq!(result.outputs[0].file_name.as_deref(), Some("step-0.json"));
}

#[tokio::test]
async fn hundred_rows_with_three_bad_prices() {
    let (dir, registry, store) = setup();
    let mut csv = String::from("sku;price\n");
    for i in 0..100 {
        if i == 10 || i == 50 || i == 99 {
            csv.push_str(&format!("P{};unknown\n", i));
        } else {
            csv.push_str(&format!("P{};{}.5\n", i, i));
        }
    }
    let path = dir.path().join("import.csv");
    fs::write(&path, csv).unwrap();

    let raw = workflow(json!([{
        "from": {
            "type": "format",
            "source": { "source_type": "uri", "config": { "uri": format!("file://{}", path.display()) } },
            "format": { "format_type": "csv", "options": { "delimiter": ";" } },
            "mapping": { "sku": "sku", "price": "price" }
        },
        "to": {
            "type": "entity",
            "entity_definition": "product",
            "path": "/imports",
            "mode": "create",
            "mapping": { "sku": "sku", "price": "price" }
        }
    }]));

    let result = Pipeline::new(registry.as_ref(), &store)
        .run(&decode_workflow(&raw).unwrap(), RunRequest::new(RunTrigger::Schedule))
        .await
        .unwrap();

    assert_eq!(result.status, RunState::PartiallyFailed);
    assert_eq!(result.processed_items, 100);
    assert_eq!(result.failed_items, 3);
    assert_eq!(result.failures.iter().map(|f| f.record).collect::<Vec<_>>(), vec![11, 51, 100]);
    assert_eq!(store.len(), 97);
}

#[tokio::test]
async fn entity_source_updates_by_key() {
    let (_dir, registry, store) = setup();
    for (sku, price) in [("A1", 1.5), ("B2", 4.0)] {
        let fields = json!({ "sku": sku, "price": price }).as_object().cloned().unwrap();
        store.create_entity("product", "/", fields).unwrap();
    }

    let raw = workflow(json!([{
        "from": {
            "type": "entity",
            "entity_definition": "product",
            "mapping": { "sku": "sku", "price": "price" }
        },
        "transform": {
            "type": "arithmetic",
            "target": "doubled",
            "left": { "kind": "field", "field": "price" },
            "op": "mul",
            "right": { "kind": "const", "value": 2 }
        },
        "to": {
            "type": "entity",
            "entity_definition": "product",
            "path": "/",
            "mode": "update",
            "update_key": "sku",
            "mapping": { "sku": "sku", "price": "doubled" }
        }
    }]));

    let result = Pipeline::new(registry.as_ref(), &store)
        .run(&decode_workflow(&raw).unwrap(), RunRequest::manual())
        .await
        .unwrap();

    assert_eq!(result.status, RunState::Completed);
    assert_eq!(result.processed_items, 2);

    let products = store.all("product").unwrap();
    let price_of = |sku: &str| {
        products
            .iter()
            .find(|p| p.fields["sku"] == json!(sku))
            .and_then(|p| p.fields["price"].as_f64())
            .unwrap()
    };
    assert_eq!(price_of("A1"), 3.0);
    assert_eq!(price_of("B2"), 8.0);
}

#[tokio::test]
async fn pushed_payload_with_lookup_and_forwarding() {
    let (_dir, registry, store) = setup();
    let fields = json!({ "code": "EUR", "rate": 2 }).as_object().cloned().unwrap();
    store.create_entity("currency", "/", fields).unwrap();

    let raw = workflow(json!([
        {
            "from": {
                "type": "format",
                "source": { "source_type": "api" },
                "format": { "format_type": "csv" },
                "mapping": { "Name": "name", "Amount": "amount" }
            },
            "transform": {
                "type": "arithmetic",
                "target": "converted",
                "left": { "kind": "field", "field": "amount" },
                "op": "mul",
                "right": {
                    "kind": "external_entity_field",
                    "entity_definition": "currency",
                    "filter": { "field": "code", "value": "EUR" },
                    "field": "rate"
                }
            },
            "to": { "type": "next_step", "mapping": { "name": "name", "converted": "total" } }
        },
        {
            "from": {
                "type": "format",
                "source": { "source_type": "api" },
                "mapping": { "name": "name", "total": "total" }
            },
            "transform": {
                "type": "concat",
                "target": "line",
                "left": { "kind": "field", "field": "name" },
                "separator": ": ",
                "right": { "kind": "field", "field": "total" }
            },
            "to": {
                "type": "format",
                "output": { "mode": "api" },
                "format": { "format_type": "json" },
                "mapping": { "line": "line" }
            }
        }
    ]));

    let report = validate_workflow_value(&raw, registry.as_ref());
    assert!(report.valid, "{:?}", report.violations);

    let payload = ApiPayload::Text("Name,Amount\nlamp,5\nchair,x\n".to_string());
    let result = Pipeline::new(registry.as_ref(), &store)
        .run(&decode_workflow(&raw).unwrap(), RunRequest::new(RunTrigger::Api).with_payload(payload))
        .await
        .unwrap();

    assert_eq!(result.status, RunState::PartiallyFailed);
    assert_eq!(result.processed_items, 2);
    assert_eq!(result.failures[0].step, 0);
    assert_eq!(result.api_output().unwrap().body, r#"[{"line":"lamp: 10"}]"#);
}

#[tokio::test]
async fn unreadable_source_fails_the_run() {
    let (dir, registry, store) = setup();
    let missing = dir.path().join("missing.csv");

    let raw = workflow(json!([{
        "from": {
            "type": "format",
            "source": { "source_type": "uri", "config": { "uri": missing.display().to_string() } },
            "mapping": { "sku": "sku", "price": "price" }
        },
        "to": {
            "type": "entity",
            "entity_definition": "product",
            "path": "/",
            "mode": "create",
            "mapping": { "sku": "sku", "price": "price" }
        }
    }]));

    let result = Pipeline::new(registry.as_ref(), &store)
        .run(&decode_workflow(&raw).unwrap(), RunRequest::manual())
        .await
        .unwrap();

    assert_eq!(result.status, RunState::Failed);
    assert!(result.error.is_some());
    assert!(store.is_empty());
}
