//! OpenAI-compatible backend: chat completions over HTTP.
//!
//! Works against api.openai.com and any compatible endpoint (OpenRouter,
//! vLLM, llama.cpp server). The API key is passed in by the caller, who
//! resolves it from the environment; it is never read from configuration
//! files.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{CoreError, GenerationRequest, Result};

use super::GenerationBackend;

/// Generation backend speaking the `/chat/completions` endpoint.
pub struct OpenAiBackend {
    name: String,
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiBackend {
    /// Backend `name` talking to `api_base` with the given model and key.
    pub fn new(
        name: impl Into<String>,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CoreError::Configuration(format!("http client: {}", e)))?;
        Ok(Self {
            name: name.into(),
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Backend(format!("openai request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoreError::Backend(format!(
                "openai returned status {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Backend(format!("openai response malformed: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CoreError::Backend("openai response had no choices".to_string()))
    }
}
