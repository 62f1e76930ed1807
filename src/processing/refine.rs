//! Stage-3 semantic refinement: greedy forward merge of adjacent chunks.
//!
//! Adjacent chunks whose embeddings are similar enough get merged into one.
//! The merge is greedy and forward-only: a decision is never revisited, so the
//! pass costs O(N) embeddings plus O(N) similarity comparisons. Merged text is
//! re-embedded rather than averaged, since concatenation changes meaning: the
//! buffer's vector has to come from the merged text.

use crate::embedding::{EmbeddingClient, cosine_similarity};

use super::chunking::count_tokens;
use super::types::{Chunk, RefineError};

/// Merge adjacent chunks whose cosine similarity exceeds `threshold`.
///
/// Output chunks are re-numbered 0..N-1 in commit order and re-token-counted
/// from their final text. `threshold = 1.0` disables merging entirely;
/// anything below the minimum similarity collapses the input into one chunk.
pub async fn refine_chunks(
    chunks: Vec<Chunk>,
    threshold: f32,
    embedder: &dyn EmbeddingClient,
) -> Result<Vec<Chunk>, RefineError> {
    let mut iter = chunks.into_iter();
    let Some(first) = iter.next() else {
        return Ok(Vec::new());
    };

    let mut committed: Vec<String> = Vec::new();
    let mut buffer_text = first.text;
    let mut buffer_embedding = embedder.embed(&buffer_text).await?;

    for chunk in iter {
        let next_embedding = embedder.embed(&chunk.text).await?;
        let similarity = cosine_similarity(&buffer_embedding, &next_embedding);

        if similarity > threshold {
            buffer_text.push(' ');
            buffer_text.push_str(&chunk.text);
            buffer_embedding = embedder.embed(&buffer_text).await?;
        } else {
            committed.push(buffer_text);
            buffer_text = chunk.text;
            buffer_embedding = next_embedding;
        }
    }
    committed.push(buffer_text);

    Ok(committed
        .into_iter()
        .enumerate()
        .map(|(chunk_id, text)| {
            let token_count = count_tokens(&text);
            Chunk {
                chunk_id,
                text,
                token_count,
            }
        })
        .collect())
}
