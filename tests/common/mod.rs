//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use miqat::{
    CoreError, EntryCategory, GenerationBackend, GenerationRequest, KnowledgeEntry,
    KnowledgeStore, SourceSet,
};

/// A backend that replays a scripted sequence of outcomes, recording every
/// prompt it receives.
pub struct ScriptedBackend {
    name: String,
    script: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(name: &str, script: Vec<Result<String, String>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> miqat::Result<String> {
        self.prompts.lock().push(request.prompt.clone());
        match self.script.lock().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(cause)) => Err(CoreError::Backend(cause)),
            None => Err(CoreError::Backend("script exhausted".to_string())),
        }
    }
}

/// A backend that fails every call with the same cause.
pub struct FailingBackend {
    name: String,
    cause: String,
}

impl FailingBackend {
    pub fn new(name: &str, cause: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            cause: cause.to_string(),
        })
    }
}

#[async_trait]
impl GenerationBackend for FailingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _request: &GenerationRequest) -> miqat::Result<String> {
        Err(CoreError::Backend(self.cause.clone()))
    }
}

/// A loaded knowledge store with one FAQ-style source set.
pub fn faq_store(entries: &[(&str, &str)]) -> Arc<KnowledgeStore> {
    let store = Arc::new(KnowledgeStore::new());
    let entries: Vec<KnowledgeEntry> = entries
        .iter()
        .map(|(id, text)| KnowledgeEntry::new(*id, EntryCategory::Faq, *text))
        .collect();
    store
        .load(&[SourceSet::new("faq", entries)])
        .expect("test corpus loads");
    store
}
