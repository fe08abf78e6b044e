//! The step DSL.
//!
//! - `step`: the grammar (sources, destinations, formats, transforms, workflow)
//! - `operand`: transform operands and entity filters
//! - `mapping`: ordered field renaming tables
//! - `sanitize`: cleanup of raw authored steps
//! - `schema`: embedded JSON Schema and shape previews
//!
//! ## Example
//!
//! ```rust,ignore
//! use stepflow::dsl::Step;
//!
//! let step: Step = serde_json::from_str(step_json)?;
//! ```

pub mod mapping;
pub mod operand;
pub mod sanitize;
pub mod schema;
pub mod step;

pub use mapping::Mapping;
pub use operand::{ArithmeticOp, Filter, FilterOperator, Operand, StringOperand};
pub use sanitize::{sanitize_step, sanitize_steps};
pub use schema::{preview_step_shape, step_schema, STEP_TYPES};
pub use step::{
    ApiSource, Auth, EntitySource, FormatOptions, FormatSpec, FormatType, FromDef, OutputMode,
    OutputSpec, SourceConfig, Step, ToDef, Transform, UriSource, Workflow, WorkflowConfig,
    WriteMode,
};
