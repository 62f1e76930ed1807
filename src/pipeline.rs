//! Background pipeline orchestration.
//!
//! One pipeline run executes as a single background task per project,
//! scheduled off the request path. The runner owns the in-process registry of
//! live runs (the mutual-exclusion authority) and the persisted run-state
//! record; everything a poller observes (state, progress, results) is read
//! fresh from disk. Failures inside a run surface through the status surface,
//! never through the call that started it.

use crate::embedding::FoldingEncoder;
use crate::generation::{
    GenerationEngine, GenerationError, GenerationOutcome, PromptTemplate, ResumePoint,
};
use crate::llm::{GenerationConfig, ProviderSettings, provider_for};
use crate::metrics::RunMetrics;
use crate::processing::{
    ChunkingError, PipelineSettings, RefineError, chunk_text, clean_text, refine_chunks,
};
use crate::project::{ProjectStore, StoreError};
use crate::state::{RunState, StateError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Cooperative cancellation flag passed into the generation loop.
///
/// Checked once per chunk boundary; an in-flight model call is never
/// interrupted, only the next iteration is skipped.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation at the next chunk boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Errors returned by the orchestration surface (synchronously, before a task
/// is spawned). Failures inside a running task become error artifacts instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A run is already in progress for this project.
    #[error("a pipeline run is already in progress for '{0}'")]
    Conflict(String),
    /// The project does not exist.
    #[error("project '{0}' not found")]
    NotFound(String),
    /// Stop was requested but no run is live.
    #[error("no pipeline run is currently active for '{0}'")]
    NotRunning(String),
    /// Resume was requested without a usable checkpoint.
    #[error("project '{0}' has no partial checkpoint to resume from")]
    NotResumable(String),
    /// State record transition was rejected.
    #[error(transparent)]
    State(#[from] StateError),
    /// Storage operation failed while staging the run.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures raised by stages inside a running task.
#[derive(Debug, Error)]
enum StageError {
    #[error("stage I/O failed: {0}")]
    Store(#[from] StoreError),
    #[error("chunking failed: {0}")]
    Chunking(#[from] ChunkingError),
    #[error("refinement failed: {0}")]
    Refine(#[from] RefineError),
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

struct RunHandle {
    cancel: CancelToken,
    task: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<String, RunHandle>>>;

/// Orchestrates clean → chunk → refine → generate as one cancellable unit of
/// work per project.
pub struct PipelineRunner {
    store: ProjectStore,
    provider_settings: ProviderSettings,
    embedding_dimension: usize,
    metrics: Arc<RunMetrics>,
    registry: Registry,
}

impl PipelineRunner {
    /// Build a runner over the given store and provider endpoints.
    pub fn new(
        store: ProjectStore,
        provider_settings: ProviderSettings,
        embedding_dimension: usize,
    ) -> Self {
        Self {
            store,
            provider_settings,
            embedding_dimension,
            metrics: Arc::new(RunMetrics::new()),
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Project store backing this runner.
    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    /// Run counters for diagnostics.
    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Start a fresh four-stage run in the background.
    ///
    /// Returns as soon as the task is spawned; rejects with
    /// [`PipelineError::Conflict`] when a run is already live. Prior result,
    /// partial, progress, and error artifacts are deleted before staging.
    pub fn start_run(
        &self,
        project: &str,
        settings: PipelineSettings,
        config: GenerationConfig,
    ) -> Result<(), PipelineError> {
        if !self.store.project_exists(project) {
            return Err(PipelineError::NotFound(project.to_string()));
        }

        let mut registry = self.registry.lock().expect("run registry poisoned");
        self.ensure_no_live_run(&mut registry, project)?;
        self.enter_running_state(project)?;
        self.store.clear_run_artifacts(project)?;
        self.metrics.record_start();

        let cancel = CancelToken::new();
        let task = tokio::spawn(Self::fresh_run_task(
            self.store.clone(),
            self.registry.clone(),
            Arc::clone(&self.metrics),
            self.provider_settings.clone(),
            self.embedding_dimension,
            project.to_string(),
            settings.sanitized(),
            config,
            cancel.clone(),
        ));
        registry.insert(project.to_string(), RunHandle { cancel, task });
        tracing::info!(project, "Pipeline run started");
        Ok(())
    }

    /// Resume a stopped run from its partial checkpoint.
    ///
    /// Skips the clean/chunk/refine stages entirely and re-enters the
    /// generation engine with the previously computed chunk list, the
    /// checkpointed pairs as seed, and the progress `done` count as the first
    /// chunk index to request.
    pub fn resume_run(
        &self,
        project: &str,
        config: GenerationConfig,
    ) -> Result<(), PipelineError> {
        if !self.store.project_exists(project) {
            return Err(PipelineError::NotFound(project.to_string()));
        }

        let mut registry = self.registry.lock().expect("run registry poisoned");
        self.ensure_no_live_run(&mut registry, project)?;

        let seed_pairs = self
            .store
            .load_partial_pairs(project)
            .map_err(|_| PipelineError::NotResumable(project.to_string()))?;
        let resume_from = self
            .store
            .load_progress(project)
            .map(|progress| progress.done)
            .unwrap_or(0);

        self.store
            .transition_state(project, &[RunState::Stopped], RunState::Running)?;
        self.store.clear_error(project)?;
        self.metrics.record_start();

        let cancel = CancelToken::new();
        let task = tokio::spawn(Self::resume_run_task(
            self.store.clone(),
            self.registry.clone(),
            Arc::clone(&self.metrics),
            self.provider_settings.clone(),
            project.to_string(),
            config,
            cancel.clone(),
            ResumePoint {
                resume_from,
                seed_pairs,
            },
        ));
        registry.insert(project.to_string(), RunHandle { cancel, task });
        tracing::info!(project, resume_from, "Pipeline run resumed");
        Ok(())
    }

    /// Request cancellation of the live run at its next chunk boundary.
    pub fn stop_run(&self, project: &str) -> Result<(), PipelineError> {
        let registry = self.registry.lock().expect("run registry poisoned");
        match registry.get(project) {
            Some(handle) if !handle.task.is_finished() => {
                handle.cancel.cancel();
                tracing::info!(project, "Stop requested");
                Ok(())
            }
            _ => Err(PipelineError::NotRunning(project.to_string())),
        }
    }

    /// Whether a background task for this project is currently live.
    pub fn is_running(&self, project: &str) -> bool {
        let registry = self.registry.lock().expect("run registry poisoned");
        registry
            .get(project)
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    fn ensure_no_live_run(
        &self,
        registry: &mut HashMap<String, RunHandle>,
        project: &str,
    ) -> Result<(), PipelineError> {
        if let Some(handle) = registry.get(project) {
            if !handle.task.is_finished() {
                return Err(PipelineError::Conflict(project.to_string()));
            }
            registry.remove(project);
        }
        Ok(())
    }

    /// Move the state record to Running. A record already at Running with no
    /// live task in the registry is a stale marker from a crashed process and
    /// is reclaimed with a warning.
    fn enter_running_state(&self, project: &str) -> Result<(), PipelineError> {
        if self.store.run_state(project) == RunState::Running {
            tracing::warn!(project, "Stale running state with no live task; reclaiming");
            self.store.force_state(project, RunState::Running)?;
            return Ok(());
        }
        self.store.transition_state(
            project,
            &[
                RunState::Idle,
                RunState::Stopped,
                RunState::Finished,
                RunState::Errored,
            ],
            RunState::Running,
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn fresh_run_task(
        store: ProjectStore,
        registry: Registry,
        metrics: Arc<RunMetrics>,
        provider_settings: ProviderSettings,
        embedding_dimension: usize,
        project: String,
        settings: PipelineSettings,
        config: GenerationConfig,
        cancel: CancelToken,
    ) {
        let mut guard = RunGuard::new(store.clone(), registry, project.clone());
        let result = Self::execute_stages(
            &store,
            &provider_settings,
            embedding_dimension,
            &project,
            &settings,
            &config,
            &cancel,
        )
        .await;
        Self::finalize_run(&store, &metrics, &project, result);
        guard.disarm();
    }

    async fn resume_run_task(
        store: ProjectStore,
        registry: Registry,
        metrics: Arc<RunMetrics>,
        provider_settings: ProviderSettings,
        project: String,
        config: GenerationConfig,
        cancel: CancelToken,
        resume: ResumePoint,
    ) {
        let mut guard = RunGuard::new(store.clone(), registry, project.clone());
        let provider = provider_for(&config, &provider_settings);
        let template = PromptTemplate::load_or_default(store.root());
        let engine = GenerationEngine::new(store.clone());
        let result = engine
            .generate(
                &project,
                &config,
                provider.as_ref(),
                &template,
                &cancel,
                resume,
            )
            .await
            .map_err(StageError::from);
        Self::finalize_run(&store, &metrics, &project, result);
        guard.disarm();
    }

    /// The four stages, in order. Generation owns its own checkpointing; the
    /// earlier stages persist their outputs here.
    async fn execute_stages(
        store: &ProjectStore,
        provider_settings: &ProviderSettings,
        embedding_dimension: usize,
        project: &str,
        settings: &PipelineSettings,
        config: &GenerationConfig,
        cancel: &CancelToken,
    ) -> Result<GenerationOutcome, StageError> {
        tracing::info!(project, "Cleaning raw text");
        let raw = store.load_raw_text(project)?;
        let cleaned = clean_text(&raw);
        store.save_cleaned_text(project, &cleaned)?;

        tracing::info!(
            project,
            chunk_size = settings.chunk_size,
            chunk_overlap = settings.chunk_overlap,
            "Chunking"
        );
        let chunks = chunk_text(&cleaned, settings.chunk_size, settings.chunk_overlap)?;

        tracing::info!(
            project,
            chunks = chunks.len(),
            threshold = settings.similarity_threshold,
            "Refining"
        );
        let embedder = FoldingEncoder::new(embedding_dimension);
        let chunks = refine_chunks(chunks, settings.similarity_threshold, &embedder).await?;
        store.save_chunks(project, &chunks)?;

        tracing::info!(project, chunks = chunks.len(), "Generating");
        let provider = provider_for(config, provider_settings);
        let template = PromptTemplate::load_or_default(store.root());
        let engine = GenerationEngine::new(store.clone());
        Ok(engine
            .generate(
                project,
                config,
                provider.as_ref(),
                &template,
                cancel,
                ResumePoint::default(),
            )
            .await?)
    }

    /// Terminal state transition for a finished task. Every exit path of the
    /// task funnels through here (the guard covers panics).
    fn finalize_run(
        store: &ProjectStore,
        metrics: &RunMetrics,
        project: &str,
        result: Result<GenerationOutcome, StageError>,
    ) {
        match result {
            Ok(GenerationOutcome::Completed {
                pairs,
                failed_chunks,
            }) => {
                if let Err(error) = store.force_state(project, RunState::Finished) {
                    tracing::error!(project, error = %error, "Failed to persist finished state");
                }
                metrics.record_completion(pairs as u64);
                tracing::info!(project, pairs, failed_chunks, "Pipeline complete");
            }
            Ok(GenerationOutcome::Stopped { next_chunk, pairs }) => {
                if let Err(error) = store.force_state(project, RunState::Stopped) {
                    tracing::error!(project, error = %error, "Failed to persist stopped state");
                }
                tracing::info!(project, next_chunk, pairs, "Pipeline stopped on request");
            }
            Err(error) => {
                tracing::error!(project, error = %error, "Pipeline failed");
                // Generation records its own fatal errors; cover the rest.
                if !store.has_error(project) {
                    let _ = store.record_error(project, &error.to_string());
                }
                if let Err(state_error) = store.force_state(project, RunState::Errored) {
                    tracing::error!(project, error = %state_error, "Failed to persist errored state");
                }
            }
        }
    }
}

/// Drop guard guaranteeing state cleanup on every exit path of a run task,
/// including panics. Normal completion disarms the error path; registry
/// removal always happens.
struct RunGuard {
    store: ProjectStore,
    registry: Registry,
    project: String,
    armed: bool,
}

impl RunGuard {
    fn new(store: ProjectStore, registry: Registry, project: String) -> Self {
        Self {
            store,
            registry,
            project,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self
                .store
                .record_error(&self.project, "pipeline task terminated unexpectedly");
            let _ = self.store.force_state(&self.project, RunState::Errored);
        }
        if let Ok(mut registry) = self.registry.lock() {
            registry.remove(&self.project);
        }
    }
}
