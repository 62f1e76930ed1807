//! Token-bounded chunking of normalized text.
//!
//! Splitting walks a hierarchy of separators (paragraph break, line break,
//! space, character) so that no produced piece exceeds the token budget, then
//! applies a token-limited sliding overlap so spans around boundaries stay
//! visible to downstream prompts. Token counting prefers the `cl100k_base`
//! encoding; when the encoder cannot be constructed, a deterministic
//! characters-divided-by-four heuristic takes over.

use semchunk_rs::Chunker;
use std::sync::{Arc, OnceLock};
use tiktoken_rs::{CoreBPE, cl100k_base};

use super::types::{Chunk, ChunkingError};

/// Pluggable token-counting function.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

static ENCODER: OnceLock<Option<Arc<CoreBPE>>> = OnceLock::new();

fn shared_encoder() -> Option<Arc<CoreBPE>> {
    ENCODER
        .get_or_init(|| match cl100k_base() {
            Ok(encoding) => Some(Arc::new(encoding)),
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "Tokenizer unavailable; falling back to character heuristic"
                );
                None
            }
        })
        .clone()
}

/// Count tokens in `text` using the active counter.
pub fn count_tokens(text: &str) -> usize {
    match shared_encoder() {
        Some(encoding) => encoding.encode_ordinary(text).len(),
        None => heuristic_token_count(text),
    }
}

/// Deterministic fallback: characters divided by 4, minimum 1.
fn heuristic_token_count(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

/// Build the default token counter, binding the shared encoder once.
pub(crate) fn default_token_counter() -> TokenCounter {
    match shared_encoder() {
        Some(encoding) => Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len()),
        None => Arc::new(heuristic_token_count),
    }
}

/// Split normalized text into token-bounded chunks with the default counter.
///
/// Deterministic for identical input and parameters. Returns an empty vector
/// for all-whitespace input.
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(chunk_text_with_counter(
        text,
        chunk_size,
        chunk_overlap,
        default_token_counter(),
    ))
}

/// Lower-level chunker that accepts an explicit token counter.
///
/// You likely want [`chunk_text`]; this helper exists for tests and for
/// callers that need to plug in a custom counter.
pub(crate) fn chunk_text_with_counter(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    token_counter: TokenCounter,
) -> Vec<Chunk> {
    let counter_for_chunker = token_counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let pieces = chunker.chunk(text);
    let pieces = apply_overlap(pieces, chunk_size, chunk_overlap, &token_counter);

    pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_id, text)| {
            let token_count = token_counter.as_ref()(&text);
            Chunk {
                chunk_id,
                text,
                token_count,
            }
        })
        .collect()
}

/// Prefix each chunk after the first with the tail of its predecessor, capped
/// at `overlap` tokens, while keeping the result inside the token budget.
fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 || chunks.is_empty() {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut iter = chunks.into_iter();
    let mut previous = iter.next().expect("non-empty chunk list");
    overlapped.push(previous.clone());

    for current in iter {
        let tail = tail_within_budget(&previous, effective_overlap, token_counter);
        let mut combined = String::with_capacity(tail.len() + current.len() + 1);
        if !tail.is_empty() {
            combined.push_str(tail);
            if !tail.ends_with(char::is_whitespace) && !current.starts_with(char::is_whitespace) {
                combined.push(' ');
            }
        }
        combined.push_str(&current);
        overlapped.push(shrink_to_budget(combined, chunk_size, token_counter));
        previous = current;
    }

    overlapped
}

/// Longest suffix of `text` that fits inside `token_limit` tokens.
fn tail_within_budget<'a>(
    text: &'a str,
    token_limit: usize,
    token_counter: &TokenCounter,
) -> &'a str {
    let mut start = 0;
    loop {
        let candidate = text[start..].trim_start();
        if token_counter.as_ref()(candidate) <= token_limit {
            return candidate;
        }
        match text[start..].char_indices().nth(1) {
            Some((offset, _)) => start += offset,
            None => return "",
        }
    }
}

/// Trim from the front until the text fits the token budget.
fn shrink_to_budget(text: String, token_budget: usize, token_counter: &TokenCounter) -> String {
    if token_counter.as_ref()(&text) <= token_budget {
        return text;
    }
    tail_within_budget(&text, token_budget, token_counter).to_string()
}
