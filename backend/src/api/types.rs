//! Request and response bodies of the HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

use crate::destination::RunOutput;
use crate::dsl::FormatType;
use crate::pipeline::{RunResult, RunTrigger};
use crate::validation::Violation;

/// `POST /api/validate`: either a bare step list or a whole workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Value>,
}

/// `POST /api/run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequestBody {
    pub workflow: Value,
    /// Body for `api` sources: JSON, or a string parsed with the step format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default)]
    pub trigger: RunTrigger,
}

/// Run result plus what the API caller should receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    #[serde(flatten)]
    pub result: RunResult,
    /// Body of the first `api` output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// URLs of saved downloads
    #[serde(default)]
    pub downloads: Vec<String>,
}

impl RunResponse {
    pub fn new(result: RunResult, download_prefix: &str) -> Self {
        let response = result.api_output().map(response_body);
        let downloads = result
            .downloads()
            .filter_map(|o| o.saved_to.as_deref())
            .filter_map(|saved| Path::new(saved).file_name())
            .map(|name| format!("{}/{}", download_prefix.trim_end_matches('/'), name.to_string_lossy()))
            .collect();
        Self {
            result,
            response,
            downloads,
        }
    }
}

/// JSON outputs are embedded as JSON, CSV outputs as a string.
pub fn response_body(output: &RunOutput) -> Value {
    match output.format_type {
        FormatType::Json => {
            serde_json::from_str(&output.body).unwrap_or_else(|_| Value::String(output.body.clone()))
        }
        FormatType::Csv => Value::String(output.body.clone()),
    }
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}

/// Error response carrying validation violations.
pub fn rejected_response(violations: &[Violation]) -> Value {
    json!({
        "status": "error",
        "error": format!("Workflow has {} validation violation(s)", violations.len()),
        "violations": violations,
    })
}
