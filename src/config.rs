//! TOML configuration for the assistant core.
//!
//! Loaded once at startup and validated before anything is built from it.
//! Secrets never live in the file: backends that need an API key name an
//! environment variable instead, resolved at build time.
//!
//! ```toml
//! [retrieval]
//! top_k = 4
//!
//! [prompt]
//! budget_chars = 4000
//! max_recent_turns = 8
//!
//! [generation]
//! order = ["local", "cloud"]
//!
//! [generation.backends.local]
//! kind = "ollama"
//! base_url = "http://localhost:11434"
//! model = "llama3.2"
//! timeout_secs = 60
//!
//! [generation.backends.cloud]
//! kind = "openai"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [session]
//! idle_timeout_secs = 1800
//! ```

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineOptions;
use crate::gateway::ollama::OllamaBackend;
use crate::gateway::openai::OpenAiBackend;
use crate::gateway::{GenerationBackend, GenerationGateway, StaticBackend};
use crate::prompt::PromptBudget;
use crate::retrieval::Retriever;
use crate::session::SessionStore;
use crate::types::{CoreError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MiqatConfig {
    /// Retrieval tunables.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Prompt composition tunables.
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Generation backends and their fallback order.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Session lifecycle policy.
    #[serde(default)]
    pub session: SessionConfig,
}

// ============= Retrieval Configuration =============

/// Retrieval tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// How many results retrieval returns per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Results scoring at or below this are dropped.
    #[serde(default)]
    pub min_score: f32,
}

fn default_top_k() -> usize {
    4
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
        }
    }
}

// ============= Prompt Configuration =============

/// Prompt composition tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Character budget for a composed prompt.
    #[serde(default = "default_budget_chars")]
    pub budget_chars: usize,

    /// How many recent turns composition may consider.
    #[serde(default = "default_max_recent_turns")]
    pub max_recent_turns: usize,
}

fn default_budget_chars() -> usize {
    4000
}

fn default_max_recent_turns() -> usize {
    8
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_chars: default_budget_chars(),
            max_recent_turns: default_max_recent_turns(),
        }
    }
}

// ============= Generation Configuration =============

/// Generation backends and their fallback order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenerationConfig {
    /// Backend names in fallback priority order.
    #[serde(default)]
    pub order: Vec<String>,

    /// Named backend definitions.
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
}

/// Which protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local Ollama server.
    Ollama,
    /// OpenAI-compatible chat completions endpoint.
    Openai,
    /// Fixed-reply backend, for offline runs and tests.
    Static,
}

/// One named backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Protocol spoken by this backend.
    pub kind: BackendKind,

    /// Endpoint base URL; defaults per kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model identifier to request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Environment variable holding the API key, for kinds that need one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Fixed reply text, for `static` backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl BackendConfig {
    /// Per-call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build the backend this config describes.
    pub fn build(&self, name: &str) -> Result<Arc<dyn GenerationBackend>> {
        match self.kind {
            BackendKind::Ollama => {
                let base_url = self
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434".to_string());
                let model = self.model.clone().ok_or_else(|| {
                    CoreError::Configuration(format!("backend '{}' needs a model", name))
                })?;
                Ok(Arc::new(OllamaBackend::new(name, base_url, model)?))
            }
            BackendKind::Openai => {
                let base_url = self
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
                let model = self.model.clone().ok_or_else(|| {
                    CoreError::Configuration(format!("backend '{}' needs a model", name))
                })?;
                let key_env = self.api_key_env.as_deref().ok_or_else(|| {
                    CoreError::Configuration(format!("backend '{}' needs api_key_env", name))
                })?;
                let api_key = std::env::var(key_env).map_err(|_| {
                    CoreError::Configuration(format!(
                        "backend '{}': environment variable {} is not set",
                        name, key_env
                    ))
                })?;
                Ok(Arc::new(OpenAiBackend::new(name, base_url, api_key, model)?))
            }
            BackendKind::Static => {
                let reply = self
                    .reply
                    .clone()
                    .unwrap_or_else(|| "I cannot reach a generation backend right now.".to_string());
                Ok(Arc::new(StaticBackend::new(name, reply)))
            }
        }
    }
}

// ============= Session Configuration =============

/// Session lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds of inactivity before a session is evicted.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Capacity of the per-session retrieval cache.
    #[serde(default = "default_cache_entries")]
    pub retrieval_cache_entries: usize,
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

fn default_cache_entries() -> usize {
    32
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            retrieval_cache_entries: default_cache_entries(),
        }
    }
}

// ============= Loading & Validation =============

impl MiqatConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| CoreError::Configuration(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let toml_str = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&toml_str)
    }

    /// Check internal consistency. Called by the loaders; public so
    /// hand-built configs can be checked too.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(CoreError::Configuration(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        if self.prompt.budget_chars == 0 {
            return Err(CoreError::Configuration(
                "prompt.budget_chars must be at least 1".to_string(),
            ));
        }
        if self.session.retrieval_cache_entries == 0 {
            return Err(CoreError::Configuration(
                "session.retrieval_cache_entries must be at least 1".to_string(),
            ));
        }
        if self.generation.order.is_empty() {
            return Err(CoreError::Configuration(
                "generation.order must name at least one backend".to_string(),
            ));
        }
        for name in &self.generation.order {
            if !self.generation.backends.contains_key(name) {
                return Err(CoreError::Configuration(format!(
                    "generation.order references undefined backend '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Build the gateway with every configured backend registered.
    pub fn build_gateway(&self) -> Result<GenerationGateway> {
        let mut gateway = GenerationGateway::new();
        for (name, backend_config) in &self.generation.backends {
            let backend = backend_config.build(name)?;
            gateway.register(name.clone(), backend, backend_config.timeout());
        }
        Ok(gateway)
    }

    /// Build the session store this config describes.
    pub fn build_session_store(&self) -> Result<SessionStore> {
        let capacity = NonZeroUsize::new(self.session.retrieval_cache_entries)
            .ok_or_else(|| {
                CoreError::Configuration(
                    "session.retrieval_cache_entries must be at least 1".to_string(),
                )
            })?;
        Ok(SessionStore::new(
            Duration::from_secs(self.session.idle_timeout_secs),
            capacity,
        ))
    }

    /// Build the retriever this config describes.
    pub fn build_retriever(&self) -> Retriever {
        Retriever::new().with_min_score(self.retrieval.min_score)
    }

    /// Engine tunables derived from this config.
    pub fn engine_options(&self) -> Result<EngineOptions> {
        let top_k = NonZeroUsize::new(self.retrieval.top_k).ok_or_else(|| {
            CoreError::Configuration("retrieval.top_k must be at least 1".to_string())
        })?;
        Ok(EngineOptions {
            top_k,
            prompt_budget: PromptBudget::chars(self.prompt.budget_chars),
            max_recent_turns: self.prompt.max_recent_turns,
            backend_order: self.generation.order.clone(),
        })
    }
}
