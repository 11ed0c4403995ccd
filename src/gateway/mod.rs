//! Generation gateway: one contract over many backends, with ordered
//! fallback.
//!
//! Every provider implements [`GenerationBackend`] - a single capability,
//! prompt in, text out. The [`GenerationGateway`] holds named backends with
//! a per-backend timeout and tries them in the caller's priority order: a
//! failure (connection error, quota, malformed response, or timeout) is
//! logged and the next backend is tried; only when the whole chain is
//! exhausted does the caller see [`CoreError::GenerationUnavailable`],
//! carrying the last underlying cause.
//!
//! No backend call can block indefinitely: each one runs under
//! `tokio::time::timeout`, and a timeout counts as that backend's failure.

pub mod ollama;
pub mod openai;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::types::{CoreError, GenerationRequest, GenerationResponse, Result};

#[cfg(test)]
use mockall::automock;

/// A generation provider. One capability: turn a prompt into text.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Identifier reported back to callers on success.
    fn name(&self) -> &str;

    /// Generate a completion for the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// A backend registered with the gateway, plus its call deadline.
struct BackendSlot {
    backend: Arc<dyn GenerationBackend>,
    timeout: Duration,
}

/// Ordered-fallback dispatcher over registered backends.
#[derive(Default)]
pub struct GenerationGateway {
    slots: HashMap<String, BackendSlot>,
}

impl GenerationGateway {
    /// Create an empty gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under `name` with a per-call timeout. Re-using a
    /// name replaces the previous registration.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        backend: Arc<dyn GenerationBackend>,
        timeout: Duration,
    ) {
        self.slots.insert(name.into(), BackendSlot { backend, timeout });
    }

    /// Whether a backend is registered under `name`.
    pub fn has_backend(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Registered backend names, sorted.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.slots.keys().cloned().collect();
        names.sort();
        names
    }

    /// Try backends in `order` until one succeeds.
    ///
    /// The winning text is whitespace-normalized; everything else about it
    /// is untouched. The response always names the backend that produced it.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        order: &[String],
    ) -> Result<GenerationResponse> {
        let mut last_cause = "no backends in fallback order".to_string();

        for name in order {
            let slot = match self.slots.get(name) {
                Some(slot) => slot,
                None => {
                    last_cause = format!("backend '{}' is not registered", name);
                    warn!(backend = %name, "skipping unregistered backend");
                    continue;
                }
            };

            let started = Instant::now();
            let outcome =
                tokio::time::timeout(slot.timeout, slot.backend.generate(request)).await;
            let latency = started.elapsed();

            match outcome {
                Ok(Ok(text)) => {
                    debug!(backend = %name, latency_ms = latency.as_millis() as u64, "generation succeeded");
                    return Ok(GenerationResponse {
                        text: normalize_whitespace(&text),
                        backend: name.clone(),
                        latency,
                    });
                }
                Ok(Err(err)) => {
                    last_cause = format!("{}: {}", name, err);
                    warn!(backend = %name, error = %err, "backend failed, trying next");
                }
                Err(_) => {
                    last_cause =
                        format!("{}: timed out after {:?}", name, slot.timeout);
                    warn!(backend = %name, timeout = ?slot.timeout, "backend timed out, trying next");
                }
            }
        }

        Err(CoreError::GenerationUnavailable { last_cause })
    }
}

/// Normalize response whitespace: CRLF to LF, trailing space stripped per
/// line, runs of blank lines collapsed to one, ends trimmed.
pub fn normalize_whitespace(text: &str) -> String {
    let unix = text.replace("\r\n", "\n");
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0usize;
    for line in unix.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

// ============================================================================
// Static Backend
// ============================================================================

/// A backend that always returns a fixed reply. Useful offline and as the
/// terminal entry of a fallback chain.
#[derive(Debug, Clone)]
pub struct StaticBackend {
    name: String,
    reply: String,
}

impl StaticBackend {
    /// Backend named `name` always answering `reply`.
    pub fn new(name: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl GenerationBackend for StaticBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        Ok(self.reply.clone())
    }
}
