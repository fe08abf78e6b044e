//! Pipeline execution.
//!
//! A run streams the records of every root step through
//! `extract -> map -> evaluate -> coerce -> write`. Per-record failures are
//! counted and recorded without stopping the run; a source that cannot be
//! opened fails it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stepflow::pipeline::{Pipeline, RunRequest};
//!
//! let result = Pipeline::new(&registry, &store).run(&workflow, RunRequest::manual()).await?;
//! println!("{} processed, {} failed", result.processed_items, result.failed_items);
//! ```

pub mod executor;
pub mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::destination::RunOutput;
use crate::dsl::OutputMode;
use crate::source::ApiPayload;

pub use executor::{root_steps, Pipeline};
pub use state::{RunState, RunTracker};

/// What started a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    #[default]
    Manual,
    Schedule,
    Api,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Schedule => "schedule",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "schedule" => Ok(Self::Schedule),
            "api" => Ok(Self::Api),
            other => Err(format!("Unknown trigger '{}'", other)),
        }
    }
}

/// Shared stop signal for a running pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a run needs besides the workflow itself.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub trigger: RunTrigger,
    pub payload: Option<ApiPayload>,
    pub cancel: CancellationFlag,
}

impl RunRequest {
    pub fn new(trigger: RunTrigger) -> Self {
        Self {
            trigger,
            ..Self::default()
        }
    }

    pub fn manual() -> Self {
        Self::new(RunTrigger::Manual)
    }

    pub fn with_payload(mut self, payload: ApiPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

/// One failed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// 1-based position of the record in the run
    pub record: usize,
    /// Step where it failed
    pub step: usize,
    pub message: String,
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {} (step {}): {}", self.record, self.step, self.message)
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub workflow: String,
    pub trigger: RunTrigger,
    pub status: RunState,
    pub processed_items: usize,
    pub failed_items: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outputs: Vec<RunOutput>,
    pub failures: Vec<RecordFailure>,
    pub cancelled: bool,
    /// Why the run failed, when a source could not be opened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    /// First output meant as the response to an API caller.
    pub fn api_output(&self) -> Option<&RunOutput> {
        self.outputs.iter().find(|o| o.mode == OutputMode::Api)
    }

    pub fn downloads(&self) -> impl Iterator<Item = &RunOutput> {
        self.outputs.iter().filter(|o| o.mode == OutputMode::Download)
    }

    pub fn succeeded_items(&self) -> usize {
        self.processed_items - self.failed_items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_parsing() {
        assert_eq!("Schedule".parse::<RunTrigger>().unwrap(), RunTrigger::Schedule);
        assert!("cron".parse::<RunTrigger>().is_err());
        assert_eq!(serde_json::to_string(&RunTrigger::Api).unwrap(), "\"api\"");
    }

    #[test]
    fn test_cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let request = RunRequest::manual().with_cancellation(flag.clone());
        assert!(!request.cancel.is_cancelled());
        flag.cancel();
        assert!(request.cancel.is_cancelled());
    }
}
