//! The run loop.

use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use super::{RecordFailure, RunRequest, RunResult, RunState, RunTracker, RunTrigger};
use crate::api::logs::{log_warning, LogLevel, RunLog};
use crate::config::EngineConfig;
use crate::destination::{bare_file_name, forward_row, EntityWriter, FormatSink, RunOutput};
use crate::dsl::{OutputMode, Step, ToDef, Workflow};
use crate::error::{PipelineError, PipelineResult, RecordError};
use crate::models::Record;
use crate::registry::EntityTypeRegistry;
use crate::source::{open_source, SourceContext};
use crate::store::{EntityStore, StoreLookup};
use crate::transform::evaluate;
use crate::validation::validate;

/// Failure of one record, tagged with the step it happened in.
type StepFailure = (usize, RecordError);

/// Steps that open their own source: those no `next_step` forwards to.
pub fn root_steps(steps: &[Step]) -> Vec<usize> {
    let targets: HashSet<usize> = steps
        .iter()
        .enumerate()
        .filter_map(|(i, step)| step.to.forward_target(i))
        .collect();
    (0..steps.len()).filter(|i| !targets.contains(i)).collect()
}

/// Runs workflows against a registry and a store.
pub struct Pipeline<'a> {
    registry: &'a dyn EntityTypeRegistry,
    store: &'a dyn EntityStore,
    http_timeout: Duration,
    max_logged_failures: usize,
    download_dir: Option<PathBuf>,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a dyn EntityTypeRegistry, store: &'a dyn EntityStore) -> Self {
        let defaults = EngineConfig::default();
        Self {
            registry,
            store,
            http_timeout: defaults.http_timeout,
            max_logged_failures: defaults.max_logged_failures,
            download_dir: None,
        }
    }

    /// Take the HTTP timeout and failure log limit from `config`.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.http_timeout = config.http_timeout;
        self.max_logged_failures = config.max_logged_failures;
        self
    }

    /// Also write download outputs into `dir`.
    pub fn save_downloads_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Execute `workflow` once.
    ///
    /// Errors are returned only when the run cannot start (disabled workflow,
    /// invalid steps) or cannot deliver its outputs. Everything else is
    /// reported on the [`RunResult`].
    pub async fn run(&self, workflow: &Workflow, request: RunRequest) -> PipelineResult<RunResult> {
        if !workflow.enabled && request.trigger != RunTrigger::Manual {
            return Err(PipelineError::Disabled(workflow.name.clone()));
        }

        let steps = &workflow.config.steps;
        if let Err(violations) = validate(steps, self.registry) {
            for violation in &violations {
                log_warning(format!("'{}': {}", workflow.name, violation));
            }
            return Err(PipelineError::Rejected(violations.len()));
        }

        let run_id = Uuid::new_v4();
        let log = RunLog::new(run_id);
        let started_at = Utc::now();
        log.info(format!(
            "▶️ Run of '{}' started ({} trigger, {} step(s))",
            workflow.name,
            request.trigger,
            steps.len()
        ));

        let mut tracker = RunTracker::new();
        let mut sinks: BTreeMap<usize, FormatSink> = steps
            .iter()
            .enumerate()
            .filter_map(|(i, step)| FormatSink::for_step(i, &step.to).map(|sink| (i, sink)))
            .collect();
        let mut processed = 0usize;
        let mut failures: Vec<RecordFailure> = Vec::new();
        let mut cancelled = false;
        let mut open_error: Option<String> = None;

        let ctx = SourceContext {
            store: self.store,
            payload: request.payload.as_ref(),
            http_timeout: self.http_timeout,
        };

        tracker.advance(RunState::Extracting)?;

        // Every root source is opened before the first record moves.
        let mut opened = Vec::new();
        for root in root_steps(steps) {
            match open_source(&steps[root].from, &ctx).await {
                Ok(records) => {
                    log.emit(LogLevel::Info, format!("Step {}: source opened", root), 1);
                    opened.push((root, records));
                }
                Err(e) => {
                    log.error(format!("Step {}: cannot open source: {}", root, e));
                    open_error = Some(format!("Step {}: {}", root, e));
                    break;
                }
            }
        }
        if open_error.is_some() {
            opened.clear();
        }

        'roots: for (root, records) in opened {
            for item in records {
                if request.cancel.is_cancelled() {
                    cancelled = true;
                    break 'roots;
                }
                processed += 1;

                let outcome = match item {
                    Ok(row) => {
                        tracker.advance(RunState::Transforming)?;
                        match self.transform_row(steps, root, &row) {
                            Ok(row) => {
                                tracker.advance(RunState::Loading)?;
                                self.load_row(steps, root, row, &mut sinks)
                            }
                            Err(failure) => Err(failure),
                        }
                    }
                    Err(e) => Err((root, e)),
                };
                tracker.advance(RunState::Extracting)?;

                if let Err((step, e)) = outcome {
                    let failure = RecordFailure {
                        record: processed,
                        step,
                        message: e.to_string(),
                    };
                    if failures.len() < self.max_logged_failures {
                        log.emit(LogLevel::Warning, format!("Record {} failed at step {}: {}", processed, step, e), 1);
                    }
                    failures.push(failure);
                }
            }
        }

        let failed = failures.len();
        if failed > self.max_logged_failures {
            log.warning(format!(
                "{} more record failure(s) not shown",
                failed - self.max_logged_failures
            ));
        }
        if cancelled {
            log.warning(format!("Run cancelled after {} record(s)", processed));
        }

        let status = if open_error.is_some() {
            RunState::Failed
        } else if failed == 0 {
            RunState::Completed
        } else {
            RunState::PartiallyFailed
        };
        tracker.advance(status)?;

        let mut outputs = Vec::new();
        if status != RunState::Failed {
            for sink in sinks.into_values() {
                let mut output = sink.finish()?;
                if let Some(dir) = &self.download_dir {
                    if output.mode == OutputMode::Download {
                        output.saved_to = Some(save_download(dir, &output).await?);
                    }
                }
                outputs.push(output);
            }
        }

        match status {
            RunState::Completed => log.success(format!(
                "Run of '{}' completed: {} record(s)",
                workflow.name, processed
            )),
            RunState::PartiallyFailed => log.warning(format!(
                "Run of '{}' partially failed: {} of {} record(s) failed",
                workflow.name, failed, processed
            )),
            _ => log.error(format!("Run of '{}' failed", workflow.name)),
        }

        Ok(RunResult {
            run_id,
            workflow: workflow.name.clone(),
            trigger: request.trigger,
            status,
            processed_items: processed,
            failed_items: failed,
            started_at,
            finished_at: Utc::now(),
            outputs,
            failures,
            cancelled,
            error: open_error,
        })
    }

    /// Source mapping then transform of one step.
    fn transform_row(&self, steps: &[Step], index: usize, row: &Record) -> Result<Record, StepFailure> {
        let step = &steps[index];
        let mapped = step.from.mapping().rename(row);
        let lookup = StoreLookup::new(self.store);
        evaluate(&step.transform, &mapped, &lookup).map_err(|e| (index, e))
    }

    /// Deliver a transformed row, following `next_step` forwards.
    fn load_row(
        &self,
        steps: &[Step],
        index: usize,
        row: Record,
        sinks: &mut BTreeMap<usize, FormatSink>,
    ) -> Result<(), StepFailure> {
        let mut index = index;
        let mut row = row;

        loop {
            let to = &steps[index].to;
            match to {
                ToDef::Format { .. } => {
                    if let Some(sink) = sinks.get_mut(&index) {
                        sink.push(&row);
                    }
                    return Ok(());
                }
                ToDef::Entity { .. } => {
                    EntityWriter::new(self.registry, self.store)
                        .write(to, &row)
                        .map_err(|e| (index, e))?;
                    return Ok(());
                }
                ToDef::NextStep { .. } => {
                    let target = to.forward_target(index).unwrap_or(index + 1);
                    if target <= index || target >= steps.len() {
                        return Err((index, RecordError::Forward(target)));
                    }
                    let forwarded = forward_row(to, &row);
                    row = self.transform_row(steps, target, &forwarded)?;
                    index = target;
                }
            }
        }
    }
}

/// Write a download output and return its path.
async fn save_download(dir: &Path, output: &RunOutput) -> PipelineResult<String> {
    let name = output
        .file_name
        .as_deref()
        .and_then(bare_file_name)
        .ok_or_else(|| PipelineError::Output(format!("Output of step {} has no file name", output.step)))?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, output.body.as_bytes()).await?;
    Ok(path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{FormatSpec, FromDef, Mapping, OutputSpec, Transform, WriteMode};
    use crate::models::{EntityDefinition, FieldDef, FieldType};
    use crate::pipeline::CancellationFlag;
    use crate::registry::RegistrySnapshot;
    use crate::source::ApiPayload;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> RegistrySnapshot {
        RegistrySnapshot::new().with_definition(
            EntityDefinition::new("product")
                .with_field(FieldDef::new("sku", FieldType::String).required())
                .with_field(FieldDef::new("price", FieldType::Float).required()),
        )
    }

    fn push_step(mapping: Mapping, to: ToDef) -> Step {
        let from: FromDef = serde_json::from_value(json!({
            "type": "format",
            "source": { "source_type": "api", "config": {} },
            "format": { "format_type": "json" },
            "mapping": mapping
        }))
        .unwrap();
        Step::new(from, Transform::None, to)
    }

    fn api_output(field: &str) -> ToDef {
        ToDef::Format {
            output: OutputSpec { mode: OutputMode::Api, file_name: None },
            format: FormatSpec::json(),
            mapping: Mapping::new().with(field, field),
        }
    }

    fn create_product() -> ToDef {
        ToDef::Entity {
            entity_definition: "product".into(),
            path: "/".into(),
            mode: WriteMode::Create,
            identify: None,
            update_key: None,
            mapping: Mapping::new().with("sku", "sku").with("price", "price"),
        }
    }

    #[test]
    fn test_root_steps() {
        let forward = ToDef::NextStep { step: None, mapping: Mapping::new() };
        let steps = vec![
            push_step(Mapping::new().with("a", "a"), forward),
            push_step(Mapping::new().with("a", "a"), api_output("a")),
            push_step(Mapping::new().with("a", "a"), api_output("a")),
        ];
        assert_eq!(root_steps(&steps), vec![0, 2]);
    }

    #[tokio::test]
    async fn test_coercion_failures_partially_fail_the_run() {
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));
        let items: Vec<_> = (0..100)
            .map(|i| {
                let price = if i % 40 == 7 { json!("n/a") } else { json!(i) };
                json!({ "sku": format!("P{}", i), "price": price })
            })
            .collect();

        let workflow = Workflow::new(
            "import",
            vec![push_step(Mapping::new().with("sku", "sku").with("price", "price"), create_product())],
        );
        let request = RunRequest::new(RunTrigger::Api).with_payload(ApiPayload::Json(json!(items)));
        let result = Pipeline::new(&registry, &store).run(&workflow, request).await.unwrap();

        assert_eq!(result.status, RunState::PartiallyFailed);
        assert_eq!(result.processed_items, 100);
        assert_eq!(result.failed_items, 3);
        assert_eq!(store.len(), 97);
        assert_eq!(result.failures[0].record, 8);
        assert!(result.failures[0].message.contains("price"));
    }

    #[tokio::test]
    async fn test_forwarding_applies_each_mapping() {
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));

        let first = Step::new(
            serde_json::from_value(json!({
                "type": "format",
                "source": { "source_type": "api", "config": {} },
                "format": { "format_type": "json" },
                "mapping": { "cost": "price" }
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "type": "arithmetic",
                "target": "total",
                "left": { "kind": "field", "field": "price" },
                "op": "mul",
                "right": { "kind": "const", "value": 2 }
            }))
            .unwrap(),
            ToDef::NextStep { step: Some(1), mapping: Mapping::new().with("total", "amount") },
        );
        let second = push_step(Mapping::new().with("amount", "amount"), api_output("amount"));

        let workflow = Workflow::new("forward", vec![first, second]);
        let request = RunRequest::manual().with_payload(ApiPayload::Json(json!([{ "cost": 4 }])));
        let result = Pipeline::new(&registry, &store).run(&workflow, request).await.unwrap();

        assert_eq!(result.status, RunState::Completed);
        assert_eq!(result.api_output().unwrap().body, r#"[{"amount":8}]"#);
    }

    #[tokio::test]
    async fn test_missing_payload_fails_the_run() {
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));
        let workflow = Workflow::new("inbound", vec![push_step(Mapping::new().with("a", "a"), api_output("a"))]);

        let result = Pipeline::new(&registry, &store)
            .run(&workflow, RunRequest::manual())
            .await
            .unwrap();

        assert_eq!(result.status, RunState::Failed);
        assert_eq!(result.processed_items, 0);
        assert!(result.outputs.is_empty());
        assert!(result.error.unwrap().contains("payload"));
    }

    #[tokio::test]
    async fn test_unopenable_second_root_fails_before_any_record() {
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));
        let missing: FromDef = serde_json::from_value(json!({
            "type": "format",
            "source": { "source_type": "uri", "config": { "uri": "/no/such/file.csv" } },
            "format": { "format_type": "csv" },
            "mapping": { "sku": "sku" }
        }))
        .unwrap();

        let workflow = Workflow::new(
            "two-sources",
            vec![
                push_step(Mapping::new().with("sku", "sku").with("price", "price"), create_product()),
                Step::new(missing, Transform::None, api_output("sku")),
            ],
        );
        let request = RunRequest::manual().with_payload(ApiPayload::Json(json!([
            { "sku": "A", "price": 1 },
            { "sku": "B", "price": 2 }
        ])));
        let result = Pipeline::new(&registry, &store).run(&workflow, request).await.unwrap();

        assert_eq!(result.status, RunState::Failed);
        assert_eq!(result.processed_items, 0);
        assert!(result.outputs.is_empty());
        assert!(store.is_empty());
        assert!(result.error.unwrap().starts_with("Step 1"));
    }

    #[tokio::test]
    async fn test_disabled_workflow_rejects_non_manual_triggers() {
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));
        let mut workflow = Workflow::new("off", vec![push_step(Mapping::new().with("a", "a"), api_output("a"))]);
        workflow.enabled = false;
        let payload = ApiPayload::Json(json!([{ "a": 1 }]));
        let pipeline = Pipeline::new(&registry, &store);

        for trigger in [RunTrigger::Schedule, RunTrigger::Api] {
            let request = RunRequest::new(trigger).with_payload(payload.clone());
            assert!(matches!(
                pipeline.run(&workflow, request).await,
                Err(PipelineError::Disabled(_))
            ));
        }

        let result = pipeline
            .run(&workflow, RunRequest::manual().with_payload(payload))
            .await
            .unwrap();
        assert_eq!(result.status, RunState::Completed);
    }

    #[tokio::test]
    async fn test_invalid_workflow_is_rejected() {
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));
        let workflow = Workflow::new("empty", vec![]);

        let err = Pipeline::new(&registry, &store)
            .run(&workflow, RunRequest::manual())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Rejected(1)));
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_dispatch() {
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));
        let workflow = Workflow::new(
            "import",
            vec![push_step(Mapping::new().with("sku", "sku").with("price", "price"), create_product())],
        );
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let request = RunRequest::manual()
            .with_payload(ApiPayload::Json(json!([{ "sku": "A", "price": 1 }])))
            .with_cancellation(cancel);

        let result = Pipeline::new(&registry, &store).run(&workflow, request).await.unwrap();

        assert!(result.cancelled);
        assert_eq!(result.processed_items, 0);
        assert_eq!(result.status, RunState::Completed);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_downloads_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));
        let to = ToDef::Format {
            output: OutputSpec { mode: OutputMode::Download, file_name: Some("prices.csv".into()) },
            format: FormatSpec::csv(),
            mapping: Mapping::new().with("price", "price"),
        };
        let workflow = Workflow::new("export", vec![push_step(Mapping::new().with("price", "price"), to)]);
        let request = RunRequest::manual().with_payload(ApiPayload::Json(json!([{ "price": 3 }])));

        let result = Pipeline::new(&registry, &store)
            .save_downloads_to(dir.path())
            .run(&workflow, request)
            .await
            .unwrap();

        let saved = result.outputs[0].saved_to.clone().unwrap();
        assert_eq!(std::fs::read_to_string(saved).unwrap(), "price\n3\n");
    }

    #[tokio::test]
    async fn test_download_in_a_directory_is_saved_under_its_bare_name() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let store = MemoryStore::new(Arc::new(registry.clone()));
        let to = ToDef::Format {
            output: OutputSpec { mode: OutputMode::Download, file_name: Some("exports/prices.csv".into()) },
            format: FormatSpec::csv(),
            mapping: Mapping::new().with("price", "price"),
        };
        let workflow = Workflow::new("export", vec![push_step(Mapping::new().with("price", "price"), to)]);
        let request = RunRequest::manual().with_payload(ApiPayload::Json(json!([{ "price": 3 }])));

        // Validation refuses such names, so run the sink path directly.
        let result = Pipeline::new(&registry, &store)
            .save_downloads_to(dir.path())
            .run(&workflow, request)
            .await;
        assert!(matches!(result, Err(PipelineError::Rejected(1))));

        let mut sink = FormatSink::for_step(0, &workflow.config.steps[0].to).unwrap();
        sink.push(&json!({ "price": 3 }).as_object().cloned().unwrap());
        let output = sink.finish().unwrap();
        let saved = save_download(dir.path(), &output).await.unwrap();
        assert_eq!(saved, dir.path().join("prices.csv").display().to_string());
        assert_eq!(output.file_name.as_deref(), Some("prices.csv"));
    }
}
