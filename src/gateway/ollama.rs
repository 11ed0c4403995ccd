//! Ollama backend: local inference over the Ollama HTTP API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{CoreError, GenerationRequest, Result};

use super::GenerationBackend;

/// Generation backend speaking Ollama's `/api/generate` endpoint.
pub struct OllamaBackend {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaBackend {
    /// Backend `name` talking to an Ollama server at `base_url` with the
    /// given model tag.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CoreError::Configuration(format!("http client: {}", e)))?;
        Ok(Self {
            name: name.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaRequest {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Backend(format!("ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoreError::Backend(format!(
                "ollama returned status {}",
                response.status()
            )));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Backend(format!("ollama response malformed: {}", e)))?;

        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let backend =
            OllamaBackend::new("ollama", "http://localhost:11434/", "llama3.2").unwrap();
        assert_eq!(backend.base_url, "http://localhost:11434");
        assert_eq!(backend.name(), "ollama");
    }

    #[test]
    fn test_request_payload_shape() {
        let body = OllamaRequest {
            model: "llama3.2",
            prompt: "Question: test?",
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "llama3.2");
        assert_eq!(json["stream"], false);
    }
}
