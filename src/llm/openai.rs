//! Hosted model adapter speaking the OpenAI chat-completions API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{GenerationConfig, ModelProvider, ProviderError};

const HOSTED_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Client for an OpenAI-compatible hosted API.
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    fallback_api_key: Option<String>,
}

impl OpenAiClient {
    /// Construct a client against the given base URL with an optional
    /// fallback key used when the run config carries none.
    pub fn new(base_url: String, fallback_api_key: Option<String>) -> Self {
        let http = Client::builder()
            .user_agent("dataforge/generate")
            .timeout(HOSTED_CALL_TIMEOUT)
            .build()
            .expect("Failed to construct reqwest::Client for hosted provider");
        Self {
            http,
            base_url,
            fallback_api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }

    fn resolve_api_key(&self, config: &GenerationConfig) -> Result<String, ProviderError> {
        config
            .api_key
            .clone()
            .or_else(|| self.fallback_api_key.clone())
            .filter(|key| !key.trim().is_empty())
            .ok_or(ProviderError::MissingApiKey)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl ModelProvider for OpenAiClient {
    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, ProviderError> {
        let api_key = self.resolve_api_key(config)?;

        let mut payload = serde_json::Map::new();
        payload.insert("model".into(), json!(config.model_name));
        payload.insert(
            "messages".into(),
            json!([{ "role": "user", "content": prompt }]),
        );
        payload.insert("temperature".into(), json!(config.temperature));
        payload.insert("top_p".into(), json!(config.top_p));
        if let Some(max_tokens) = config.max_tokens {
            payload.insert("max_tokens".into(), json!(max_tokens));
        }
        if config.frequency_penalty != 0.0 {
            payload.insert("frequency_penalty".into(), json!(config.frequency_penalty));
        }
        if config.presence_penalty != 0.0 {
            payload.insert("presence_penalty".into(), json!(config.presence_penalty));
        }

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                ProviderError::Unavailable(format!(
                    "failed to reach hosted API at {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed { status, body });
        }

        let body: ChatResponse = response.json().await.map_err(|error| {
            ProviderError::InvalidResponse(format!("failed to decode response: {error}"))
        })?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("response carried no choices".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn hosted_config(api_key: Option<&str>) -> GenerationConfig {
        let mut config: GenerationConfig =
            serde_json::from_str(r#"{"model_name": "gpt-4-turbo", "provider": "openai"}"#).unwrap();
        config.api_key = api_key.map(String::from);
        config
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start_async().await;
        let client = OpenAiClient::new(server.base_url(), None);

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(json!({
                    "choices": [
                        { "message": { "role": "assistant", "content": "[]" } }
                    ]
                }));
            })
            .await;

        let text = client
            .generate("make pairs", &hosted_config(Some("sk-test")))
            .await
            .expect("generation");

        mock.assert();
        assert_eq!(text, "[]");
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let server = MockServer::start_async().await;
        let client = OpenAiClient::new(server.base_url(), None);

        let error = client
            .generate("make pairs", &hosted_config(None))
            .await
            .expect_err("missing key");
        assert!(matches!(error, ProviderError::MissingApiKey));
    }

    #[tokio::test]
    async fn config_key_takes_priority_over_fallback() {
        let server = MockServer::start_async().await;
        let client = OpenAiClient::new(server.base_url(), Some("sk-env".into()));

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-config");
                then.status(200).json_body(json!({
                    "choices": [
                        { "message": { "role": "assistant", "content": "ok" } }
                    ]
                }));
            })
            .await;

        client
            .generate("make pairs", &hosted_config(Some("sk-config")))
            .await
            .expect("generation");
        mock.assert();
    }

    #[tokio::test]
    async fn maps_error_status() {
        let server = MockServer::start_async().await;
        let client = OpenAiClient::new(server.base_url(), Some("sk-env".into()));

        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(401).body("bad key");
            })
            .await;

        let error = client
            .generate("make pairs", &hosted_config(None))
            .await
            .expect_err("error response");
        assert!(matches!(error, ProviderError::RequestFailed { .. }));
    }
}
