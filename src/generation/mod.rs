//! QA generation engine, the stateful core of the pipeline.
//!
//! The engine walks the persisted chunk list in order, asks the model
//! provider for QA pairs per chunk, and checkpoints the accumulated result
//! list atomically after every productive chunk. It is safely interruptible
//! at chunk granularity: a cancellation token is checked once per chunk
//! boundary (never mid-call), and resuming from a checkpoint re-enters the
//! loop without re-requesting or duplicating finished chunks.

pub mod parse;
pub mod prompt;

pub use prompt::PromptTemplate;

use crate::llm::{GenerationConfig, ModelProvider, ProviderError};
use crate::pipeline::CancelToken;
use crate::project::{Progress, ProjectStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tokens of chunk text per requested QA pair at density factor 1.0.
const TOKENS_PER_PAIR: f64 = 300.0;
/// Number of chunk-level errors included in a zero-result summary.
const ERROR_SUMMARY_LIMIT: usize = 10;

/// A generated question/answer pair linked to its source chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QAPair {
    /// Question text.
    pub question: String,
    /// Answer text.
    pub answer: String,
    /// `chunk_id` of the chunk this pair was generated from.
    pub chunk_id: usize,
}

/// Where the engine starts and what it starts with.
#[derive(Debug, Clone, Default)]
pub struct ResumePoint {
    /// First chunk index to request; chunks below it are never re-requested.
    pub resume_from: usize,
    /// Pairs recovered from a partial checkpoint, seeded before the loop.
    pub seed_pairs: Vec<QAPair>,
}

/// How a generation pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The loop visited every chunk.
    Completed {
        /// Total pairs in the persisted result list.
        pairs: usize,
        /// Chunks that failed (call or parse) without aborting the run.
        failed_chunks: usize,
    },
    /// A stop request was honored at a chunk boundary.
    Stopped {
        /// Index of the first chunk that was not processed.
        next_chunk: usize,
        /// Pairs persisted to the partial checkpoint.
        pairs: usize,
    },
}

/// Fatal, run-aborting generation failures.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Chunk list artifact is missing; the chunking stage may have failed.
    #[error("chunk list not found for project '{0}'")]
    MissingChunks(String),
    /// Chunk list exists but is empty; nothing to generate from.
    #[error("chunk list for project '{0}' is empty")]
    EmptyChunks(String),
    /// The very first attempted chunk failed; later chunks would fail the same way.
    #[error("model provider unreachable on first chunk: {source}")]
    FirstChunkFailed {
        /// Provider failure that triggered the abort.
        #[source]
        source: ProviderError,
    },
    /// The loop finished but produced zero pairs across all chunks.
    #[error("generation produced no QA pairs ({failed_chunks} chunk errors)")]
    NoPairs {
        /// Number of chunk-level errors recorded during the run.
        failed_chunks: usize,
    },
    /// A checkpoint or progress write failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stateful generation pass over a project's chunk list.
pub struct GenerationEngine {
    store: ProjectStore,
}

impl GenerationEngine {
    /// Build an engine writing through the given store.
    pub fn new(store: ProjectStore) -> Self {
        Self { store }
    }

    /// Per-chunk QA target: `max(1, floor(token_count / 300 * density))`.
    ///
    /// A density policy, not a hard cap: the model may return more or fewer
    /// and the engine accepts what it gets.
    pub fn qa_target(token_count: usize, density_factor: f32) -> usize {
        let raw = (token_count as f64 / TOKENS_PER_PAIR) * f64::from(density_factor);
        (raw.floor() as usize).max(1)
    }

    /// Run the generation loop for `project`.
    ///
    /// On a stop request the accumulated pairs are persisted to the partial
    /// checkpoint and the call returns `Ok(Stopped)`, a requested suspension
    /// rather than an error. Chunk-level failures after the first attempted chunk are
    /// recorded and skipped; the first attempted chunk failing is fatal.
    pub async fn generate(
        &self,
        project: &str,
        config: &GenerationConfig,
        provider: &dyn ModelProvider,
        template: &PromptTemplate,
        cancel: &CancelToken,
        resume: ResumePoint,
    ) -> Result<GenerationOutcome, GenerationError> {
        let chunks = self
            .store
            .load_chunks(project)
            .map_err(|_| GenerationError::MissingChunks(project.to_string()))?;
        if chunks.is_empty() {
            self.store
                .record_error(project, "generation: chunk list is empty, nothing to generate")?;
            return Err(GenerationError::EmptyChunks(project.to_string()));
        }

        let total = chunks.len();
        let start = resume.resume_from;
        let mut pairs = resume.seed_pairs;
        let mut chunk_errors: Vec<String> = Vec::new();

        // Result file reflects the seed immediately so a status reader sees it.
        self.store.save_qa_pairs(project, &pairs)?;
        self.store
            .save_progress(project, &Progress::new(start, total, "starting"))?;

        for (i, chunk) in chunks.iter().enumerate().skip(start) {
            if cancel.is_cancelled() {
                tracing::info!(project, chunk = i, "Stop signal honored at chunk boundary");
                self.store.save_partial_pairs(project, &pairs)?;
                self.store
                    .save_progress(project, &Progress::new(i, total, "stopped"))?;
                return Ok(GenerationOutcome::Stopped {
                    next_chunk: i,
                    pairs: pairs.len(),
                });
            }

            let qa_count = Self::qa_target(chunk.token_count, config.qa_density_factor);
            let rendered = template.render(&config.domain, qa_count, &chunk.text);

            self.store.save_progress(
                project,
                &Progress::new(i, total, format!("generating chunk {}/{total}", i + 1)),
            )?;

            let response = match provider.generate(&rendered, config).await {
                Ok(response) => response,
                Err(error) => {
                    let message =
                        format!("model call failed for chunk {}: {error}", chunk.chunk_id);
                    tracing::error!(project, chunk = chunk.chunk_id, error = %error, "Model call failed");
                    if i == start {
                        // Hundreds of later calls would fail identically.
                        self.store.record_error(
                            project,
                            &format!(
                                "generation aborted: provider unreachable on first chunk\n\
                                 provider: {:?}, model: {}\n{message}",
                                config.provider, config.model_name
                            ),
                        )?;
                        self.store
                            .save_progress(project, &Progress::new(start, total, "error"))?;
                        return Err(GenerationError::FirstChunkFailed { source: error });
                    }
                    chunk_errors.push(message);
                    continue;
                }
            };

            match parse::parse_qa_response(&response) {
                Ok(parsed) => {
                    if parsed.is_empty() {
                        continue;
                    }
                    pairs.extend(parsed.into_iter().map(|raw| QAPair {
                        question: raw.question,
                        answer: raw.answer,
                        chunk_id: chunk.chunk_id,
                    }));
                    self.store.save_qa_pairs(project, &pairs)?;
                }
                Err(error) => {
                    let message = format!(
                        "unparseable response for chunk {}: {error} (response head: {})",
                        chunk.chunk_id,
                        response.chars().take(200).collect::<String>()
                    );
                    tracing::warn!(project, chunk = chunk.chunk_id, error = %error, "Parse failed");
                    chunk_errors.push(message);
                }
            }
        }

        // Covers the edge where the last chunk yielded no new pairs.
        self.store.save_qa_pairs(project, &pairs)?;
        self.store.clear_partial_pairs(project)?;
        self.store
            .save_progress(project, &Progress::new(total, total, "done"))?;

        if pairs.is_empty() {
            let mut summary = format!(
                "generation completed with 0 QA pairs from {total} chunks\nchunk errors ({}):",
                chunk_errors.len()
            );
            for error in chunk_errors.iter().take(ERROR_SUMMARY_LIMIT) {
                summary.push('\n');
                summary.push_str(error);
            }
            self.store.record_error(project, &summary)?;
            return Err(GenerationError::NoPairs {
                failed_chunks: chunk_errors.len(),
            });
        }

        if !chunk_errors.is_empty() {
            tracing::warn!(
                project,
                failed = chunk_errors.len(),
                saved = pairs.len(),
                "Run finished with partial chunk failures"
            );
        }

        Ok(GenerationOutcome::Completed {
            pairs: pairs.len(),
            failed_chunks: chunk_errors.len(),
        })
    }
}
