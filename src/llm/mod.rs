//! Model provider abstraction for QA generation.
//!
//! A provider is a strategy object constructed once per run from
//! [`GenerationConfig::provider`] and passed down by parameter; nothing looks
//! providers up by name at call time. Each adapter owns a `reqwest` client
//! with a bounded per-call timeout, so a hung remote call cannot wedge the
//! chunk loop indefinitely.

mod local;
mod openai;

pub use local::LocalModelClient;
pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported model backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Locally hosted model server (Ollama-compatible).
    Local,
    /// Hosted OpenAI-compatible API.
    OpenAi,
}

/// Sampling and routing parameters for one generation run. Immutable for the
/// duration of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Backend selection.
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    /// Model identifier understood by the provider.
    pub model_name: String,
    /// Sampling temperature in `[0, 2]`.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Nucleus sampling parameter.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Optional completion token cap.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Frequency penalty passed through when non-zero.
    #[serde(default)]
    pub frequency_penalty: f32,
    /// Presence penalty passed through when non-zero.
    #[serde(default)]
    pub presence_penalty: f32,
    /// Subject domain substituted into the prompt template.
    #[serde(default = "default_domain")]
    pub domain: String,
    /// QA pairs requested per 300 chunk tokens; must be positive.
    #[serde(default = "default_qa_density")]
    pub qa_density_factor: f32,
    /// Caller-supplied API key; takes priority over the configured one.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Local
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

fn default_domain() -> String {
    "general".to_string()
}

fn default_qa_density() -> f32 {
    1.0
}

/// Errors surfaced by model providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider endpoint could not be reached or does not exist.
    #[error("Model provider unavailable: {0}")]
    Unavailable(String),
    /// Provider returned an error response.
    #[error("Model call failed ({status}): {body}")]
    RequestFailed {
        /// HTTP status returned by the provider.
        status: reqwest::StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Provider response could not be decoded.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// Hosted provider selected but no API key was available.
    #[error("API key not provided for the hosted provider")]
    MissingApiKey,
}

/// Interface implemented by model backends.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Generate raw text for `prompt` using the run's sampling parameters.
    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, ProviderError>;
}

/// Endpoint configuration injected into provider construction.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Base URL of the local model runtime.
    pub ollama_url: String,
    /// Base URL of the hosted API.
    pub openai_base_url: String,
    /// Fallback API key used when the run supplies none.
    pub openai_api_key: Option<String>,
}

/// Build the provider strategy object for one run.
pub fn provider_for(
    config: &GenerationConfig,
    settings: &ProviderSettings,
) -> Box<dyn ModelProvider> {
    match config.provider {
        ProviderKind::Local => Box::new(LocalModelClient::new(settings.ollama_url.clone())),
        ProviderKind::OpenAi => Box::new(OpenAiClient::new(
            settings.openai_base_url.clone(),
            settings.openai_api_key.clone(),
        )),
    }
}
