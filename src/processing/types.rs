//! Core data types and error definitions for the processing stages.

use crate::embedding::EmbeddingClientError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A token-bounded piece of the normalized text.
///
/// `chunk_id` is a dense 0-based index assigned after all merging is final and
/// re-assigned whenever the chunk list is rewritten. Immutable once persisted
/// for a given pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Dense 0-based position in output order.
    pub chunk_id: usize,
    /// Chunk text content.
    pub text: String,
    /// Token length of `text` under the active token counter.
    pub token_count: usize,
}

/// Per-run parameters for the clean/chunk/refine stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Token budget per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Target token overlap between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Cosine-similarity threshold for the greedy merge, in `[0, 1]`.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

fn default_chunk_size() -> usize {
    800
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_similarity_threshold() -> f32 {
    0.92
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl PipelineSettings {
    /// Clamp values into their documented ranges.
    pub fn sanitized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(1);
        self.similarity_threshold = self.similarity_threshold.clamp(0.0, 1.0);
        self
    }
}

/// Errors produced while turning normalized text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// The caller configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Errors produced while merging chunks by embedding similarity.
#[derive(Debug, Error)]
pub enum RefineError {
    /// The embedding provider failed to produce a vector.
    #[error("failed to embed chunk text: {0}")]
    Embedding(#[from] EmbeddingClientError),
}
