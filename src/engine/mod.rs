//! The RAG orchestrator: one request/response cycle over the whole core.
//!
//! Each request walks a fixed state machine: RECEIVED -> RETRIEVING ->
//! COMPOSING -> GENERATING -> RESPONDED, or FAILED at whichever stage broke.
//! Retrieval always runs, even against an empty corpus (zero results is not
//! an error). Failures carry the stage name and the underlying cause; no
//! partial progress survives a failed request - a retry restarts the whole
//! pipeline against the then-current corpus snapshot.
//!
//! The engine locks the session for the duration of the request, so there is
//! one logical request at a time per session while unrelated sessions
//! proceed in parallel. Backend calls inside the locked span are
//! timeout-bound by the gateway, and cancelling the request future releases
//! the lock promptly.

use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::debug;

use crate::gateway::GenerationGateway;
use crate::knowledge::KnowledgeStore;
use crate::prompt::{PromptBudget, PromptComposer};
use crate::retrieval::Retriever;
use crate::session::{RetrievalCacheKey, SessionStore};
use crate::types::{ConversationTurn, CoreError, GenerationRequest};

/// Stages of one request through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    /// Request accepted, nothing done yet.
    Received,
    /// Scoring the corpus against the query.
    Retrieving,
    /// Assembling the budgeted prompt.
    Composing,
    /// Walking the backend fallback chain.
    Generating,
    /// Terminal: answer produced.
    Responded,
    /// Terminal: the request failed.
    Failed,
}

impl std::fmt::Display for RequestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Retrieving => "retrieving",
            Self::Composing => "composing",
            Self::Generating => "generating",
            Self::Responded => "responded",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// A failed request: which stage broke, and why.
#[derive(Debug, thiserror::Error)]
#[error("request failed while {stage}: {source}")]
pub struct AskError {
    /// The stage that was running when the request failed.
    pub stage: RequestStage,
    /// The underlying cause.
    #[source]
    pub source: CoreError,
}

/// A successful answer with its provenance.
#[derive(Debug, Clone)]
pub struct AskOutcome {
    /// The generated answer.
    pub answer_text: String,
    /// Ids of the knowledge entries the prompt cited, in relevance order.
    pub cited_entry_ids: Vec<String>,
    /// Name of the backend that produced the answer.
    pub backend_used: String,
}

/// Tunables threaded from configuration into the pipeline.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// How many entries retrieval hands to composition.
    pub top_k: NonZeroUsize,
    /// Character budget for composed prompts.
    pub prompt_budget: PromptBudget,
    /// How many recent turns composition may consider.
    pub max_recent_turns: usize,
    /// Backend priority order for the fallback chain.
    pub backend_order: Vec<String>,
}

/// The assembled core: knowledge, retrieval, composition, generation and
/// session state, with explicit ownership of each collaborator.
pub struct RagEngine {
    knowledge: Arc<KnowledgeStore>,
    retriever: Retriever,
    composer: PromptComposer,
    gateway: Arc<GenerationGateway>,
    sessions: Arc<SessionStore>,
    options: EngineOptions,
}

impl RagEngine {
    /// Wire an engine from its collaborators.
    pub fn new(
        knowledge: Arc<KnowledgeStore>,
        gateway: Arc<GenerationGateway>,
        sessions: Arc<SessionStore>,
        options: EngineOptions,
    ) -> Self {
        Self {
            knowledge,
            retriever: Retriever::new(),
            composer: PromptComposer::new(),
            gateway,
            sessions,
            options,
        }
    }

    /// Replace the default retriever, e.g. with tuned scoring parameters.
    pub fn with_retriever(mut self, retriever: Retriever) -> Self {
        self.retriever = retriever;
        self
    }

    /// The session store this engine answers against.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// The knowledge store this engine reads.
    pub fn knowledge(&self) -> &Arc<KnowledgeStore> {
        &self.knowledge
    }

    /// Answer `user_text` within the given session.
    ///
    /// On success the user turn and the cited assistant turn are appended to
    /// the session together; a failed request appends nothing.
    pub async fn ask(
        &self,
        session_id: &str,
        user_text: &str,
    ) -> std::result::Result<AskOutcome, AskError> {
        debug!(session_id, stage = %RequestStage::Received, "request accepted");

        let handle = self.sessions.get_or_create(session_id);
        let mut session = handle.lock().await;

        // RETRIEVING. Always runs; an empty corpus just yields no results.
        debug!(session_id, stage = %RequestStage::Retrieving, "scoring corpus");
        let snapshot = self.knowledge.snapshot();
        let cache_key = RetrievalCacheKey::new(snapshot.version(), user_text);
        let results = match session.cached_retrieval(&cache_key) {
            Some(cached) => cached,
            None => {
                let fresh =
                    self.retriever
                        .search(&snapshot, user_text, self.options.top_k, None);
                session.cache_retrieval(cache_key, fresh.clone());
                fresh
            }
        };

        // COMPOSING.
        debug!(
            session_id,
            stage = %RequestStage::Composing,
            results = results.len(),
            "assembling prompt"
        );
        let recent = session.recent_turns(self.options.max_recent_turns);
        let document = self
            .composer
            .compose(user_text, &results, &recent, self.options.prompt_budget)
            .map_err(|source| fail(session_id, RequestStage::Composing, source))?;

        // GENERATING.
        debug!(session_id, stage = %RequestStage::Generating, "calling backends");
        let request = GenerationRequest::new(document.rendered());
        let response = self
            .gateway
            .generate(&request, &self.options.backend_order)
            .await
            .map_err(|source| fail(session_id, RequestStage::Generating, source))?;

        // RESPONDED. Both turns land together under the session lock.
        let cited = document.cited_entry_ids();
        session.append_turn(ConversationTurn::user(user_text));
        session.append_turn(ConversationTurn::assistant(
            response.text.clone(),
            cited.clone(),
        ));
        debug!(
            session_id,
            stage = %RequestStage::Responded,
            backend = %response.backend,
            latency_ms = response.latency.as_millis() as u64,
            cited = cited.len(),
            "request answered"
        );

        Ok(AskOutcome {
            answer_text: response.text,
            cited_entry_ids: cited,
            backend_used: response.backend,
        })
    }
}

fn fail(session_id: &str, stage: RequestStage, source: CoreError) -> AskError {
    debug!(session_id, stage = %RequestStage::Failed, failed_in = %stage, error = %source, "request failed");
    AskError { stage, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::StaticBackend;
    use crate::knowledge::SourceSet;
    use crate::session::{DEFAULT_CACHE_CAPACITY, DEFAULT_IDLE_THRESHOLD};
    use crate::types::{EntryCategory, KnowledgeEntry, TurnRole};
    use std::time::Duration;

    fn engine_with_corpus(entries: Vec<KnowledgeEntry>) -> RagEngine {
        let knowledge = Arc::new(KnowledgeStore::new());
        if !entries.is_empty() {
            knowledge
                .load(&[SourceSet::new("test", entries)])
                .unwrap();
        }

        let mut gateway = GenerationGateway::new();
        gateway.register(
            "stub",
            Arc::new(StaticBackend::new("stub", "A fixed answer.")),
            Duration::from_secs(1),
        );

        let sessions = Arc::new(SessionStore::new(
            DEFAULT_IDLE_THRESHOLD,
            NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap(),
        ));

        RagEngine::new(
            knowledge,
            Arc::new(gateway),
            sessions,
            EngineOptions {
                top_k: NonZeroUsize::new(3).unwrap(),
                prompt_budget: PromptBudget::chars(2000),
                max_recent_turns: 6,
                backend_order: vec!["stub".to_string()],
            },
        )
    }

    #[tokio::test]
    async fn test_end_to_end_cites_retrieved_entry() {
        let engine = engine_with_corpus(vec![KnowledgeEntry::new(
            "faq1",
            EntryCategory::Faq,
            "visa requirements for pilgrims",
        )]);

        let outcome = engine.ask("s1", "What visa do I need?").await.unwrap();
        assert_eq!(outcome.answer_text, "A fixed answer.");
        assert_eq!(outcome.cited_entry_ids, vec!["faq1"]);
        assert_eq!(outcome.backend_used, "stub");
    }

    #[tokio::test]
    async fn test_empty_corpus_still_answers() {
        let engine = engine_with_corpus(vec![]);
        let outcome = engine.ask("s1", "What visa do I need?").await.unwrap();
        assert!(outcome.cited_entry_ids.is_empty());
        assert_eq!(outcome.backend_used, "stub");
    }

    #[tokio::test]
    async fn test_success_appends_both_turns_with_citations() {
        let engine = engine_with_corpus(vec![KnowledgeEntry::new(
            "faq1",
            EntryCategory::Faq,
            "visa requirements for pilgrims",
        )]);

        engine.ask("s1", "What visa do I need?").await.unwrap();

        let turns = engine.sessions().recent_turns("s1", 10).await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].text, "What visa do I need?");
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[1].cited_entries, vec!["faq1"]);
    }

    #[tokio::test]
    async fn test_generation_failure_is_stage_tagged_and_appends_nothing() {
        let engine = {
            let mut engine = engine_with_corpus(vec![]);
            engine.options.backend_order = vec!["missing".to_string()];
            engine
        };

        let err = engine.ask("s1", "hello there").await.unwrap_err();
        assert_eq!(err.stage, RequestStage::Generating);
        assert!(matches!(
            err.source,
            CoreError::GenerationUnavailable { .. }
        ));

        let turns = engine.sessions().recent_turns("s1", 10).await;
        assert!(turns.is_empty());
    }

    #[tokio::test]
    async fn test_composition_failure_is_stage_tagged() {
        let engine = {
            let mut engine = engine_with_corpus(vec![]);
            engine.options.prompt_budget = PromptBudget::chars(5);
            engine
        };

        let err = engine
            .ask("s1", "a question far larger than five characters")
            .await
            .unwrap_err();
        assert_eq!(err.stage, RequestStage::Composing);
        assert!(matches!(err.source, CoreError::BudgetTooSmall { .. }));
    }

    #[tokio::test]
    async fn test_second_ask_sees_prior_turns_in_prompt_budgeting() {
        let engine = engine_with_corpus(vec![KnowledgeEntry::new(
            "faq1",
            EntryCategory::Faq,
            "visa requirements for pilgrims",
        )]);

        engine.ask("s1", "What visa do I need?").await.unwrap();
        let outcome = engine.ask("s1", "How long does it take?").await.unwrap();
        assert_eq!(outcome.answer_text, "A fixed answer.");

        let turns = engine.sessions().recent_turns("s1", 10).await;
        assert_eq!(turns.len(), 4);
    }
}
