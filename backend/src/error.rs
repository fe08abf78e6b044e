//! Error types for the Stepflow engine.
//!
//! This module defines one error type per concern:
//!
//! - [`SourceError`] - a source could not be opened (fatal to a run)
//! - [`RecordError`] - a single record failed (counted, the run continues)
//! - [`RegistryError`] - entity-definition registry errors
//! - [`StoreError`] - entity store read/write errors
//! - [`ConfigError`] - environment configuration errors
//! - [`PipelineError`] - top-level run orchestration errors
//! - [`ServerError`] - HTTP surface errors
//!
//! Validation problems are never errors: they are reported as lists of
//! [`crate::validation::Violation`].

use thiserror::Error;

// =============================================================================
// Source Errors
// =============================================================================

/// A source that cannot be reached or queried at all.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Local file could not be opened.
    #[error("Cannot open '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Remote document could not be fetched.
    #[error("Failed to fetch '{uri}': {message}")]
    Fetch { uri: String, message: String },

    /// URI scheme is not supported.
    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    /// An `api` source was run without a payload.
    #[error("No payload supplied for api source")]
    MissingPayload,

    /// The payload does not match the declared format.
    #[error("Payload does not match format '{0}'")]
    PayloadFormat(String),

    /// The document could not be parsed at all.
    #[error("Invalid {format} document: {message}")]
    Parse { format: String, message: String },

    /// Entity store query failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// =============================================================================
// Record Errors
// =============================================================================

/// A failure confined to one record.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecordError {
    /// A row could not be parsed from the source.
    #[error("Line {line}: {message}")]
    Parse { line: u64, message: String },

    /// A referenced field is not present in the row.
    #[error("Field '{0}' is missing from the record")]
    MissingField(String),

    /// A field value cannot be used as a number.
    #[error("Field '{field}' is not numeric (value {value})")]
    NotNumeric { field: String, value: String },

    /// Arithmetic division by zero.
    #[error("Division by zero while computing '{0}'")]
    DivisionByZero(String),

    /// Arithmetic produced NaN or infinity.
    #[error("Arithmetic result for '{0}' is not a finite number")]
    NonFinite(String),

    /// Cross-entity lookup found nothing.
    #[error("Lookup of '{field}' on '{entity}' matched no entity")]
    LookupMiss { entity: String, field: String },

    /// A required destination field coerced to null.
    #[error("Required field '{field}' has no usable {field_type} value")]
    RequiredField { field: String, field_type: String },

    /// Update could not identify its target entity.
    #[error("Cannot identify entity to update: {0}")]
    Unidentified(String),

    /// The entity store rejected the write.
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// Forwarding to another step failed.
    #[error("Cannot forward to step {0}")]
    Forward(usize),
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors from the entity-definition registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Definition not found.
    #[error("Entity definition not found: {0}")]
    NotFound(String),

    /// Invalid definition data.
    #[error("Invalid entity definition: {0}")]
    InvalidDefinition(String),

    /// IO error.
    #[error("Registry IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error.
    #[error("Registry JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the entity store's public contract.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity type unknown to the store.
    #[error("Unknown entity type: {0}")]
    UnknownType(String),

    /// A required field is missing or null.
    #[error("Field '{0}' is required")]
    MissingRequired(String),

    /// Field not defined on the entity type.
    #[error("Field '{field}' is not defined on '{entity_type}'")]
    UnknownField { entity_type: String, field: String },

    /// Update target does not exist.
    #[error("No entity matched {0}")]
    NotFound(String),

    /// Filter could not be evaluated.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Store lock was poisoned by a panicking writer.
    #[error("Store unavailable")]
    Poisoned,
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable holds an unparsable value.
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Errors that stop a run before or outside the per-record loop.
///
/// Source-open failures do not surface here: they end the run in the
/// `Failed` state and are reported on the run result.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Workflow JSON could not be decoded.
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// The workflow failed validation.
    #[error("Workflow has {0} validation violation(s)")]
    Rejected(usize),

    /// Trigger not allowed for a disabled workflow.
    #[error("Workflow '{0}' is disabled")]
    Disabled(String),

    /// Run state machine was driven through an illegal transition.
    #[error("Illegal run transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// Output could not be serialized.
    #[error("Output error: {0}")]
    Output(String),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for opening sources.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for per-record work.
pub type RecordResult<T> = Result<T, RecordError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
