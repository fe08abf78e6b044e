//! # Stepflow - declarative step pipelines
//!
//! Stepflow validates and runs pipelines written as lists of
//! `{from, transform, to}` steps: read records from a URI, an inbound payload
//! or the entity store, derive fields, and write CSV/JSON outputs or entities.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Source    │────▶│   Mapping   │────▶│  Transform  │────▶│ Destination │
//! │ uri/api/ent │     │ ext -> int  │     │ arith/concat│     │ fmt/ent/next│
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stepflow::{decode_workflow, MemoryStore, Pipeline, RegistrySnapshot, RunRequest};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(RegistrySnapshot::with_dir(".stepflow/entities"));
//!     let store = MemoryStore::new(registry.clone());
//!     let workflow = decode_workflow(&workflow_json).unwrap();
//!     let result = Pipeline::new(registry.as_ref(), &store)
//!         .run(&workflow, RunRequest::manual())
//!         .await
//!         .unwrap();
//!     println!("{} processed, {} failed", result.processed_items, result.failed_items);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per concern
//! - [`models`] - Records, field types, entity definitions
//! - [`dsl`] - Step grammar, sanitizing and schema
//! - [`coercion`] - Values to entity field shapes
//! - [`transform`] - Arithmetic and concat evaluation
//! - [`parser`] - CSV/JSON streaming and writing
//! - [`source`] / [`destination`] - Step adapters
//! - [`registry`] / [`store`] - Entity definitions and entities
//! - [`validation`] - Structural and semantic step checks
//! - [`pipeline`] - Run executor and state machine
//! - [`config`] - Environment configuration
//! - [`api`] - HTTP API server

// Core modules
pub mod config;
pub mod error;
pub mod models;

// Grammar
pub mod dsl;
pub mod validation;

// Record processing
pub mod coercion;
pub mod parser;
pub mod transform;

// Adapters
pub mod destination;
pub mod registry;
pub mod source;
pub mod store;

// Execution
pub mod pipeline;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, PipelineError, RecordError, RegistryError, ServerError, SourceError, StoreError,
};

// =============================================================================
// Re-exports - Models and DSL
// =============================================================================

pub use models::{EntityDefinition, EntityRecord, FieldDef, FieldType, Record};

pub use dsl::{
    preview_step_shape, sanitize_steps, Filter, FromDef, Mapping, Step, ToDef, Transform,
    Workflow, STEP_TYPES,
};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{
    decode_workflow, schedulable, validate, validate_raw, validate_workflow,
    validate_workflow_value, ValidationReport, Violation,
};

// =============================================================================
// Re-exports - Coercion and transforms
// =============================================================================

pub use coercion::coerce;
pub use transform::{evaluate, ExternalLookup};

// =============================================================================
// Re-exports - Registry and store
// =============================================================================

pub use registry::{EntityTypeRegistry, RegistrySnapshot};
pub use store::{EntityStore, EntityTarget, MemoryStore};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use config::EngineConfig;
pub use destination::RunOutput;
pub use pipeline::{
    CancellationFlag, Pipeline, RecordFailure, RunRequest, RunResult, RunState, RunTrigger,
};
pub use source::ApiPayload;

// Server
pub mod server {
    pub use crate::api::server::start_server;
}
