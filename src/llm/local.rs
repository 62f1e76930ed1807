//! Local model adapter speaking the Ollama generate API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{GenerationConfig, ModelProvider, ProviderError};

const LOCAL_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for a locally hosted model server.
pub struct LocalModelClient {
    http: Client,
    base_url: String,
}

impl LocalModelClient {
    /// Construct a client against the given base URL.
    pub fn new(base_url: String) -> Self {
        let http = Client::builder()
            .user_agent("dataforge/generate")
            .timeout(LOCAL_CALL_TIMEOUT)
            .build()
            .expect("Failed to construct reqwest::Client for local provider");
        Self { http, base_url }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl ModelProvider for LocalModelClient {
    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, ProviderError> {
        let mut options = serde_json::Map::new();
        options.insert("temperature".into(), json!(config.temperature));
        options.insert("top_p".into(), json!(config.top_p));
        if let Some(max_tokens) = config.max_tokens {
            options.insert("num_predict".into(), json!(max_tokens));
        }
        if config.frequency_penalty != 0.0 {
            options.insert("frequency_penalty".into(), json!(config.frequency_penalty));
        }
        if config.presence_penalty != 0.0 {
            options.insert("presence_penalty".into(), json!(config.presence_penalty));
        }

        let payload = json!({
            "model": config.model_name,
            "prompt": prompt,
            "stream": false,
            "options": options,
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                ProviderError::Unavailable(format!(
                    "failed to reach local model server at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::Unavailable(format!(
                "endpoint {} returned 404; is the model pulled?",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed { status, body });
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            ProviderError::InvalidResponse(format!("failed to decode response: {error}"))
        })?;

        if !body.done {
            return Err(ProviderError::InvalidResponse(
                "response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response)
    }
}
