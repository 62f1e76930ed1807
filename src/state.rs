//! Persisted run-state record for a project.
//!
//! Each project carries a `state.json` holding a tagged [`RunState`] value.
//! The record is the single source of truth for whether a background task
//! currently owns the project's files; readers treat anything other than
//! `Running` as permission to read result artifacts without a concurrent
//! writer. Transitions go through [`crate::project::ProjectStore::transition_state`],
//! which validates the move against the current record before atomically
//! replacing the file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle states of a project's pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No run has been staged or the project was just created.
    Idle,
    /// A background task owns the project's files.
    Running,
    /// A run was suspended at a chunk boundary; a partial checkpoint exists.
    Stopped,
    /// The last run completed all stages normally.
    Finished,
    /// The last run aborted; an error artifact describes the failure.
    Errored,
}

impl RunState {
    /// Stable lowercase name used in logs and API payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
            Self::Errored => "errored",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk shape of `state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    /// Current lifecycle state.
    pub state: RunState,
    /// RFC3339 timestamp of the last transition.
    pub updated_at: String,
}

impl StateRecord {
    /// Build a record for the given state stamped with the current time.
    pub fn now(state: RunState) -> Self {
        Self {
            state,
            updated_at: current_timestamp_rfc3339(),
        }
    }
}

/// Errors raised while validating or persisting state transitions.
#[derive(Debug, Error)]
pub enum StateError {
    /// The requested transition is not legal from the current state.
    #[error("cannot transition from '{from}' to '{to}'")]
    Conflict {
        /// State found on disk at transition time.
        from: RunState,
        /// State the caller attempted to enter.
        to: RunState,
    },
    /// The state record could not be read or replaced.
    #[error("failed to persist state record: {0}")]
    Io(#[from] std::io::Error),
    /// The state record on disk was not valid JSON.
    #[error("state record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Format the current wall-clock time as RFC3339.
pub fn current_timestamp_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
