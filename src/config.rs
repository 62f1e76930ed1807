use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Dataforge server.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Root directory holding one subdirectory per project.
    pub projects_dir: PathBuf,
    /// Default token budget per chunk when a run does not override it.
    pub default_chunk_size: usize,
    /// Default token overlap between consecutive chunks.
    pub default_chunk_overlap: usize,
    /// Default cosine-similarity threshold for the refinement stage.
    pub default_similarity_threshold: f32,
    /// Dimensionality of vectors produced by the fallback embedding encoder.
    pub embedding_dimension: usize,
    /// Base URL of the local model runtime (Ollama-compatible).
    pub ollama_url: String,
    /// Base URL of the hosted OpenAI-compatible API.
    pub openai_base_url: String,
    /// Optional API key for the hosted provider, used when a run supplies none.
    pub openai_api_key: Option<String>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

impl Config {
    /// Load configuration from environment variables, applying defaults so the
    /// server can boot without any of them set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            projects_dir: load_env_optional("DATAFORGE_PROJECTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("projects")),
            default_chunk_size: parse_env_or("DEFAULT_CHUNK_SIZE", 800)?,
            default_chunk_overlap: parse_env_or("DEFAULT_CHUNK_OVERLAP", 100)?,
            default_similarity_threshold: parse_env_or("DEFAULT_SIMILARITY_THRESHOLD", 0.92)?,
            embedding_dimension: parse_env_or("EMBEDDING_DIMENSION", 384)?,
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        projects_dir = %config.projects_dir.display(),
        chunk_size = config.default_chunk_size,
        chunk_overlap = config.default_chunk_overlap,
        similarity_threshold = config.default_similarity_threshold,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
