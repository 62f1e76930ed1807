//! Text processing stages: cleaning, chunking, and semantic refinement.

pub mod chunking;
pub mod cleaning;
pub mod refine;
pub mod types;

pub use chunking::{chunk_text, count_tokens};
pub use cleaning::clean_text;
pub use refine::refine_chunks;
pub use types::{Chunk, ChunkingError, PipelineSettings, RefineError};
