//! Ollama HTTP client.
//!
//! `/api/tags` for the connectivity probe and `/api/generate` for
//! non-streaming completions.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("cannot connect to Ollama at {0}")]
    Connect(String),

    #[error("Ollama request timed out")]
    Timeout,

    #[error("Ollama returned status {0}")]
    Status(StatusCode),

    #[error("Ollama request failed: {0}")]
    Request(reqwest::Error),
}

/// A locally installed model as listed by `/api/tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Sampling options sent with every completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    pub temperature: f64,
    pub top_p: f64,
}

pub struct OllamaClient {
    host: String,
    client: Client,
    probe_timeout: Duration,
}

impl OllamaClient {
    pub fn new(host: &str, probe_timeout: Duration) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            client: Client::new(),
            probe_timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn classify(&self, e: reqwest::Error) -> InferenceError {
        if e.is_connect() {
            InferenceError::Connect(self.host.clone())
        } else if e.is_timeout() {
            InferenceError::Timeout
        } else {
            InferenceError::Request(e)
        }
    }

    /// List installed models. Any non-2xx status is an error.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, InferenceError> {
        let url = format!("{}/api/tags", self.host);

        let resp = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !resp.status().is_success() {
            return Err(InferenceError::Status(resp.status()));
        }

        let tags: TagsResponse = resp.json().await.map_err(|e| self.classify(e))?;
        debug!("Ollama lists {} models", tags.models.len());
        Ok(tags.models)
    }

    /// Run a non-streaming completion. Returns the raw `response` field, or
    /// `None` when the server omitted it.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<Option<String>, InferenceError> {
        let body = json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "top_p": options.top_p
            }
        });

        let url = format!("{}/api/generate", self.host);
        debug!("Sending to Ollama model '{model}'");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !resp.status().is_success() {
            return Err(InferenceError::Status(resp.status()));
        }

        let data: serde_json::Value = resp.json().await.map_err(|e| self.classify(e))?;
        Ok(data["response"].as_str().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OPTIONS: GenerateOptions = GenerateOptions {
        temperature: 0.2,
        top_p: 0.9,
    };

    fn client(server: &MockServer) -> OllamaClient {
        OllamaClient::new(&server.uri(), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn lists_models_from_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [
                    {"name": "llama3:8b", "size": 4661224676u64, "modified_at": "2024-05-01T10:00:00Z"},
                    {"name": "phi3"}
                ]
            })))
            .mount(&server)
            .await;

        let models = client(&server).list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "llama3:8b");
        assert_eq!(models[0].size, 4_661_224_676);
        assert_eq!(models[1].modified_at, "");
    }

    #[tokio::test]
    async fn missing_models_array_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        assert!(client(&server).list_models().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server).list_models().await.unwrap_err();
        assert!(matches!(err, InferenceError::Status(s) if s == StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connect_error() {
        let client = OllamaClient::new("http://127.0.0.1:9", Duration::from_secs(1));
        let err = client.list_models().await.unwrap_err();
        assert!(matches!(err, InferenceError::Connect(_) | InferenceError::Timeout));
    }

    #[tokio::test]
    async fn generate_sends_non_streaming_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": "llama3",
                "prompt": "Question: hi",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Hello!"})))
            .expect(1)
            .mount(&server)
            .await;

        let out = client(&server)
            .generate("llama3", "Question: hi", OPTIONS)
            .await
            .unwrap();
        assert_eq!(out.as_deref(), Some("Hello!"));
    }

    #[tokio::test]
    async fn generate_without_response_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
            .mount(&server)
            .await;

        let out = client(&server).generate("m", "p", OPTIONS).await.unwrap();
        assert!(out.is_none());
    }
}
