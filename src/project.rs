//! Per-project artifact store.
//!
//! Every project is a directory under the store root holding the pipeline's
//! persisted artifacts:
//!
//! | file | meaning |
//! |---|---|
//! | `raw.txt` | uploaded source text |
//! | `cleaned.txt` | stage-1 normalized text |
//! | `chunks.json` | stage-2/3 chunk list |
//! | `qa_pairs.json` | accumulated QA result list |
//! | `qa_partial.json` | checkpoint written when a run is stopped |
//! | `progress.json` | latest progress snapshot |
//! | `state.json` | tagged run-state record |
//! | `error.log` | fatal error record |
//!
//! All JSON artifacts are replaced atomically (temp sibling + rename, with a
//! bounded retry for transient locks) so a concurrent status reader only ever
//! observes a complete old or complete new file.

use crate::generation::QAPair;
use crate::processing::Chunk;
use crate::state::{RunState, StateError, StateRecord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const REPLACE_ATTEMPTS: u32 = 3;
const REPLACE_BACKOFF_MS: u64 = 50;

/// Errors raised by project storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The project name contains characters outside `[A-Za-z0-9_-]`.
    #[error("invalid project name: '{0}'")]
    InvalidName(String),
    /// Creation was attempted for a project that already exists.
    #[error("project '{0}' already exists")]
    AlreadyExists(String),
    /// The project directory or a required artifact does not exist.
    #[error("project or artifact not found: {0}")]
    NotFound(String),
    /// Filesystem operation failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// A persisted artifact could not be serialized or deserialized.
    #[error("artifact serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Live progress snapshot, overwritten on every update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    /// Chunks fully processed so far.
    pub done: usize,
    /// Total chunks in the run.
    pub total: usize,
    /// `100 * done / total`, rounded to one decimal; 0 when total is 0.
    pub percent: f64,
    /// Human-readable phase description.
    pub status: String,
}

impl Progress {
    /// Build a snapshot, deriving `percent` from the counts.
    pub fn new(done: usize, total: usize, status: impl Into<String>) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            ((done as f64 / total as f64) * 1000.0).round() / 10.0
        };
        Self {
            done,
            total,
            percent,
            status: status.into(),
        }
    }
}

/// Fresh snapshot of a project's artifacts and run state.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    /// Project directory name.
    pub project_name: String,
    /// RFC3339 creation timestamp of the project directory.
    pub created_at: Option<String>,
    /// Raw text has been uploaded.
    pub has_raw: bool,
    /// Stage-1 output exists.
    pub has_cleaned: bool,
    /// Chunk list exists.
    pub has_chunks: bool,
    /// Result list exists.
    pub has_qa: bool,
    /// Number of chunks in the persisted chunk list.
    pub chunk_count: usize,
    /// Number of pairs in the persisted result list.
    pub qa_count: usize,
    /// A background task currently owns this project's files.
    pub running: bool,
    /// A run was suspended and a partial checkpoint is available for resume.
    pub stopped: bool,
    /// The last run completed normally.
    pub finished: bool,
    /// An error record is present.
    pub has_error: bool,
    /// Raw state value from the persisted record.
    pub state: RunState,
    /// Latest progress snapshot, when a run has written one.
    pub progress: Option<Progress>,
    /// Contents of the error record, when present.
    pub error: Option<String>,
}

/// Filesystem-backed store rooted at a projects directory.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory holding all projects.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute directory of a project.
    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create a new project directory.
    pub fn create_project(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        let dir = self.project_dir(name);
        if dir.exists() {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        fs::create_dir_all(&dir)?;
        tracing::info!(project = name, "Project created");
        Ok(dir)
    }

    /// Enumerate project directory names in sorted order.
    pub fn list_projects(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a project directory and everything inside it.
    pub fn delete_project(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.project_dir(name);
        if !dir.exists() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        fs::remove_dir_all(&dir)?;
        tracing::info!(project = name, "Project deleted");
        Ok(())
    }

    /// Whether the project directory exists.
    pub fn project_exists(&self, name: &str) -> bool {
        self.project_dir(name).is_dir()
    }

    // raw / cleaned text

    /// Persist uploaded source text, creating the project if needed.
    pub fn save_raw_text(&self, name: &str, text: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        let dir = self.project_dir(name);
        fs::create_dir_all(&dir)?;
        atomic_replace(&dir.join("raw.txt"), text.as_bytes())?;
        Ok(())
    }

    /// Read the uploaded source text.
    pub fn load_raw_text(&self, name: &str) -> Result<String, StoreError> {
        read_text(&self.project_dir(name).join("raw.txt"), name)
    }

    /// Persist the stage-1 normalized text.
    pub fn save_cleaned_text(&self, name: &str, text: &str) -> Result<(), StoreError> {
        atomic_replace(&self.project_dir(name).join("cleaned.txt"), text.as_bytes())?;
        Ok(())
    }

    /// Read the stage-1 normalized text.
    pub fn load_cleaned_text(&self, name: &str) -> Result<String, StoreError> {
        read_text(&self.project_dir(name).join("cleaned.txt"), name)
    }

    // chunks

    /// Persist the chunk list produced by chunking/refinement.
    pub fn save_chunks(&self, name: &str, chunks: &[Chunk]) -> Result<(), StoreError> {
        self.write_json(name, "chunks.json", chunks)
    }

    /// Load the persisted chunk list.
    pub fn load_chunks(&self, name: &str) -> Result<Vec<Chunk>, StoreError> {
        self.read_json(name, "chunks.json")
    }

    // QA results

    /// Atomically overwrite the accumulated result list.
    pub fn save_qa_pairs(&self, name: &str, pairs: &[QAPair]) -> Result<(), StoreError> {
        self.write_json(name, "qa_pairs.json", pairs)
    }

    /// Load the accumulated result list.
    pub fn load_qa_pairs(&self, name: &str) -> Result<Vec<QAPair>, StoreError> {
        self.read_json(name, "qa_pairs.json")
    }

    /// Persist the partial checkpoint written when a run is stopped.
    pub fn save_partial_pairs(&self, name: &str, pairs: &[QAPair]) -> Result<(), StoreError> {
        self.write_json(name, "qa_partial.json", pairs)
    }

    /// Load the partial checkpoint for resume.
    pub fn load_partial_pairs(&self, name: &str) -> Result<Vec<QAPair>, StoreError> {
        self.read_json(name, "qa_partial.json")
    }

    /// Whether a partial checkpoint exists.
    pub fn has_partial_pairs(&self, name: &str) -> bool {
        self.project_dir(name).join("qa_partial.json").exists()
    }

    /// Remove a leftover partial checkpoint after normal completion.
    pub fn clear_partial_pairs(&self, name: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.project_dir(name).join("qa_partial.json"))?;
        Ok(())
    }

    // progress

    /// Overwrite the progress snapshot.
    pub fn save_progress(&self, name: &str, progress: &Progress) -> Result<(), StoreError> {
        self.write_json(name, "progress.json", progress)
    }

    /// Read the latest progress snapshot, if any run has written one.
    pub fn load_progress(&self, name: &str) -> Option<Progress> {
        self.read_json(name, "progress.json").ok()
    }

    // error record

    /// Append a fatal error message to the project's error record.
    pub fn record_error(&self, name: &str, message: &str) -> Result<(), StoreError> {
        let path = self.project_dir(name).join("error.log");
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{message}")?;
        Ok(())
    }

    /// Read the error record, when present.
    pub fn load_error(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.project_dir(name).join("error.log")).ok()
    }

    /// Whether an error record exists.
    pub fn has_error(&self, name: &str) -> bool {
        self.project_dir(name).join("error.log").exists()
    }

    /// Remove the error record, e.g. before re-entering generation on resume.
    pub fn clear_error(&self, name: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.project_dir(name).join("error.log"))?;
        Ok(())
    }

    // run-state record

    /// Read the current run state; a missing or unreadable record means Idle.
    pub fn run_state(&self, name: &str) -> RunState {
        let path = self.project_dir(name).join("state.json");
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<StateRecord>(&bytes)
                .map(|record| record.state)
                .unwrap_or(RunState::Idle),
            Err(_) => RunState::Idle,
        }
    }

    /// Validated state transition: the current record must be one of
    /// `allowed_from`, otherwise the move is rejected without mutating disk.
    pub fn transition_state(
        &self,
        name: &str,
        allowed_from: &[RunState],
        to: RunState,
    ) -> Result<RunState, StateError> {
        let from = self.run_state(name);
        if !allowed_from.contains(&from) {
            return Err(StateError::Conflict { from, to });
        }
        self.force_state(name, to)?;
        tracing::debug!(project = name, %from, %to, "State transition");
        Ok(from)
    }

    /// Unconditionally replace the state record. Reserved for crash recovery;
    /// normal paths go through [`Self::transition_state`].
    pub fn force_state(&self, name: &str, to: RunState) -> Result<(), StateError> {
        let record = StateRecord::now(to);
        let bytes = serde_json::to_vec_pretty(&record)?;
        atomic_replace(&self.project_dir(name).join("state.json"), &bytes)?;
        Ok(())
    }

    // staging

    /// Delete prior result, partial, progress, and error artifacts so a fresh
    /// run starts clean. Raw and cleaned text survive.
    pub fn clear_run_artifacts(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.project_dir(name);
        for artifact in [
            "qa_pairs.json",
            "qa_partial.json",
            "progress.json",
            "error.log",
        ] {
            remove_if_exists(&dir.join(artifact))?;
        }
        Ok(())
    }

    // status

    /// Recompute the full status snapshot from file state. Never cached.
    pub fn status(&self, name: &str) -> Result<ProjectStatus, StoreError> {
        let dir = self.project_dir(name);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(name.to_string()));
        }

        let chunk_count = self.load_chunks(name).map(|c| c.len()).unwrap_or(0);
        let qa_count = self.load_qa_pairs(name).map(|p| p.len()).unwrap_or(0);
        let state = self.run_state(name);

        Ok(ProjectStatus {
            project_name: name.to_string(),
            created_at: directory_created_at(&dir),
            has_raw: dir.join("raw.txt").exists(),
            has_cleaned: dir.join("cleaned.txt").exists(),
            has_chunks: dir.join("chunks.json").exists(),
            has_qa: dir.join("qa_pairs.json").exists(),
            chunk_count,
            qa_count,
            running: state == RunState::Running,
            stopped: state == RunState::Stopped,
            finished: state == RunState::Finished,
            has_error: self.has_error(name),
            state,
            progress: self.load_progress(name),
            error: self.load_error(name),
        })
    }

    fn write_json<T: Serialize + ?Sized>(
        &self,
        name: &str,
        file: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        atomic_replace(&self.project_dir(name).join(file), &bytes)?;
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de>>(
        &self,
        name: &str,
        file: &str,
    ) -> Result<T, StoreError> {
        let path = self.project_dir(name).join(file);
        let bytes =
            fs::read(&path).map_err(|_| StoreError::NotFound(format!("{name}/{file}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

fn read_text(path: &Path, name: &str) -> Result<String, StoreError> {
    fs::read_to_string(path).map_err(|_| StoreError::NotFound(name.to_string()))
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Write to a temp sibling, then rename onto the target.
///
/// The rename is retried a few times with a short backoff: on some platforms a
/// concurrent reader can hold a transient lock on the destination. Readers see
/// either the old complete file or the new complete file, never a torn write.
fn atomic_replace(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = sibling_tmp_path(path);
    fs::write(&tmp, bytes)?;

    let mut last_err = None;
    for attempt in 0..REPLACE_ATTEMPTS {
        match fs::rename(&tmp, path) {
            Ok(()) => return Ok(()),
            Err(err) => {
                tracing::debug!(
                    path = %path.display(),
                    attempt,
                    error = %err,
                    "Atomic replace failed; retrying"
                );
                last_err = Some(err);
                std::thread::sleep(std::time::Duration::from_millis(REPLACE_BACKOFF_MS));
            }
        }
    }

    let _ = fs::remove_file(&tmp);
    let err = last_err.expect("replace loop ran at least once");
    tracing::warn!(path = %path.display(), error = %err, "Atomic replace gave up");
    Err(err)
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    file_name.push(".tmp");
    path.with_file_name(file_name)
}

fn directory_created_at(dir: &Path) -> Option<String> {
    let metadata = fs::metadata(dir).ok()?;
    let created = metadata.created().or_else(|_| metadata.modified()).ok()?;
    let stamp = time::OffsetDateTime::from(created);
    stamp
        .format(&time::format_description::well_known::Rfc3339)
        .ok()
}
