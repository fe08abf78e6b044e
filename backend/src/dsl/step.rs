//! Step grammar: sources, destinations, formats and transforms.
//!
//! A [`Step`] reads from one [`FromDef`], applies one [`Transform`] and writes
//! to one [`ToDef`]. Every union is a serde-tagged enum whose wire shape is
//! `snake_case` JSON.

use serde::{Deserialize, Serialize};

use super::mapping::Mapping;
use super::operand::{ArithmeticOp, Filter, Operand, StringOperand};

/// One `{from, transform, to}` unit of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub from: FromDef,
    #[serde(default)]
    pub transform: Transform,
    pub to: ToDef,
}

impl Step {
    pub fn new(from: FromDef, transform: Transform, to: ToDef) -> Self {
        Self { from, transform, to }
    }

    /// Whether this step is run on demand by a pushed payload.
    pub fn accepts_push(&self) -> bool {
        matches!(
            &self.from,
            FromDef::Format {
                source: SourceConfig::Api(ApiSource { endpoint: None }),
                ..
            }
        )
    }

    /// Whether this step answers its caller with a response body.
    pub fn responds_to_api(&self) -> bool {
        matches!(
            &self.to,
            ToDef::Format {
                output: OutputSpec { mode: OutputMode::Api, .. },
                ..
            }
        )
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Where a step reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FromDef {
    /// Parse records from a URI, an inbound payload, or the entity store.
    Format {
        source: SourceConfig,
        #[serde(default)]
        format: FormatSpec,
        #[serde(default)]
        mapping: Mapping,
    },

    /// Direct entity read with a single-field filter.
    Entity {
        entity_definition: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Filter>,
        #[serde(default)]
        mapping: Mapping,
    },
}

impl FromDef {
    /// External-to-internal renaming table.
    pub fn mapping(&self) -> &Mapping {
        match self {
            FromDef::Format { mapping, .. } | FromDef::Entity { mapping, .. } => mapping,
        }
    }
}

/// Source configuration of a `format` source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source_type", content = "config", rename_all = "snake_case")]
pub enum SourceConfig {
    Uri(UriSource),
    Api(ApiSource),
    Entity(EntitySource),
}

/// Fetch a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UriSource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

/// Accept an inbound payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Query the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySource {
    pub entity_definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
}

/// Credentials for a URI fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Auth {
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
    Header {
        name: String,
        value: String,
    },
}

// =============================================================================
// Destinations
// =============================================================================

/// Where a step writes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToDef {
    /// Emit CSV or JSON as an API response or downloadable file.
    Format {
        output: OutputSpec,
        #[serde(default)]
        format: FormatSpec,
        #[serde(default)]
        mapping: Mapping,
    },

    /// Create or update entities.
    Entity {
        entity_definition: String,
        path: String,
        mode: WriteMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identify: Option<Filter>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        update_key: Option<String>,
        #[serde(default)]
        mapping: Mapping,
    },

    /// Hand the row to another step.
    NextStep {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<usize>,
        #[serde(default)]
        mapping: Mapping,
    },
}

impl ToDef {
    pub fn mapping(&self) -> &Mapping {
        match self {
            ToDef::Format { mapping, .. }
            | ToDef::Entity { mapping, .. }
            | ToDef::NextStep { mapping, .. } => mapping,
        }
    }

    /// Index of the step a `next_step` destination forwards to.
    pub fn forward_target(&self, current: usize) -> Option<usize> {
        match self {
            ToDef::NextStep { step, .. } => Some(step.unwrap_or(current + 1)),
            _ => None,
        }
    }
}

/// How a `format` destination delivers its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub mode: OutputMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Api,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Create,
    Update,
}

// =============================================================================
// Formats
// =============================================================================

/// Document format and its options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatSpec {
    pub format_type: FormatType,
    #[serde(default)]
    pub options: FormatOptions,
}

impl FormatSpec {
    pub fn csv() -> Self {
        Self {
            format_type: FormatType::Csv,
            options: FormatOptions::default(),
        }
    }

    pub fn json() -> Self {
        Self {
            format_type: FormatType::Json,
            options: FormatOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    #[default]
    Csv,
    Json,
}

impl FormatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// Parsing and serialization options.
///
/// CSV reads `has_header`, `delimiter`, `quote`, `escape`, `encoding` and
/// `infer_types`; JSON reads `root`, `ndjson` and `encoding`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatOptions {
    #[serde(default = "default_has_header")]
    pub has_header: bool,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escape: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default = "default_infer_types")]
    pub infer_types: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default)]
    pub ndjson: bool,
}

fn default_has_header() -> bool {
    true
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_infer_types() -> bool {
    true
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            has_header: default_has_header(),
            delimiter: default_delimiter(),
            escape: None,
            quote: None,
            encoding: None,
            infer_types: default_infer_types(),
            root: None,
            ndjson: false,
        }
    }
}

// =============================================================================
// Transforms
// =============================================================================

/// Optional per-record field derivation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    #[default]
    None,

    Arithmetic {
        target: String,
        left: Operand,
        op: ArithmeticOp,
        right: Operand,
    },

    Concat {
        target: String,
        left: StringOperand,
        #[serde(default)]
        separator: String,
        right: StringOperand,
    },
}

impl Transform {
    /// Field written by this transform.
    pub fn target(&self) -> Option<&str> {
        match self {
            Transform::None => None,
            Transform::Arithmetic { target, .. } | Transform::Concat { target, .. } => Some(target),
        }
    }
}

// =============================================================================
// Workflow
// =============================================================================

/// Schedulable container of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub schedule_cron: Option<String>,
    pub config: WorkflowConfig,
}

fn default_enabled() -> bool {
    true
}

/// Persisted `config` document of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub steps: Vec<Step>,
}

impl Workflow {
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            enabled: true,
            schedule_cron: None,
            config: WorkflowConfig { steps },
        }
    }

    pub fn with_cron(mut self, cron: &str) -> Self {
        self.schedule_cron = Some(cron.to_string());
        self
    }

    /// Whether a time-based trigger is forbidden for this workflow.
    ///
    /// Only the first step's source decides push semantics; any step that
    /// answers an API caller forbids scheduling as well.
    pub fn is_on_demand(&self) -> bool {
        let first_accepts_push = self
            .config
            .steps
            .first()
            .map(Step::accepts_push)
            .unwrap_or(false);
        first_accepts_push || self.config.steps.iter().any(Step::responds_to_api)
    }

    /// Force the cron schedule off when the workflow is on demand.
    pub fn sanitize(&mut self) {
        if self.is_on_demand() {
            self.schedule_cron = None;
        }
        if self
            .schedule_cron
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            self.schedule_cron = None;
        }
    }
}
