#![deny(missing_docs)]

//! Core library for the Dataforge dataset server.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and the deterministic fallback encoder.
pub mod embedding;
/// JSONL export templates for generated datasets.
pub mod export;
/// QA generation engine: per-chunk loop, checkpointing, resume.
pub mod generation;
/// Model provider abstraction and adapters (Ollama, OpenAI).
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Run counters exposed for diagnostics.
pub mod metrics;
/// Background pipeline orchestration and run registry.
pub mod pipeline;
/// Text processing stages: cleaning, chunking, refinement.
pub mod processing;
/// Per-project artifact store and status snapshots.
pub mod project;
/// Persisted run-state record and transitions.
pub mod state;
