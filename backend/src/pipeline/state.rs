//! Run state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PipelineError, PipelineResult};

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Extracting,
    Transforming,
    Loading,
    Completed,
    PartiallyFailed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyFailed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// A record moves `Extracting -> Transforming -> Loading` and the loop
    /// returns to `Extracting`; a record that fails early also returns to
    /// `Extracting`. Any live state may end the run.
    pub fn can_transition(&self, next: RunState) -> bool {
        use RunState::*;

        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return *self != Pending || next == Failed;
        }
        matches!(
            (self, next),
            (Pending, Extracting)
                | (Extracting, Transforming)
                | (Transforming, Loading)
                | (Transforming, Extracting)
                | (Loading, Extracting)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Transforming => "transforming",
            Self::Loading => "loading",
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one run, advanced only through legal transitions.
#[derive(Debug, Clone)]
pub struct RunTracker {
    state: RunState,
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            state: RunState::Pending,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Move to `next`. Staying in the same live state is a no-op.
    pub fn advance(&mut self, next: RunState) -> PipelineResult<()> {
        if self.state == next && !next.is_terminal() {
            return Ok(());
        }
        if !self.state.can_transition(next) {
            return Err(PipelineError::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}
