//! # Miqat
//!
//! The RAG and conversation-state core of a conversational assistant for
//! pilgrimage travelers. Questions are answered by ranking a curated
//! knowledge corpus (guide sections, FAQ entries, phrase glossary), composing
//! a budgeted prompt with source attribution, and generating an answer
//! through an ordered chain of backends with automatic fallback. Every
//! session keeps its own append-only conversation history.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use miqat::{MiqatConfig, RagEngine, KnowledgeStore, SourceSet};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = MiqatConfig::from_toml_file("miqat.toml")?;
//!
//! let knowledge = Arc::new(KnowledgeStore::new());
//! knowledge.load(&SourceSet::from_json_dir("data")?)?;
//!
//! let engine = RagEngine::new(
//!     knowledge,
//!     Arc::new(config.build_gateway()?),
//!     Arc::new(config.build_session_store()?),
//!     config.engine_options()?,
//! );
//!
//! let outcome = engine.ask("session-1", "What visa do I need?").await?;
//! println!("{} (sources: {:?})", outcome.answer_text, outcome.cited_entry_ids);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`knowledge`] - immutable, versioned corpus snapshots
//! - [`retrieval`] - deterministic lexical ranking
//! - [`prompt`] - budget-bounded prompt assembly with provenance
//! - [`gateway`] - multi-backend generation with ordered fallback
//! - [`session`] - per-session conversation state and idle eviction
//! - [`engine`] - the request pipeline tying it all together
//! - [`config`] - TOML configuration
//! - [`types`] - shared data model and error taxonomy
//!
//! ## Concurrency model
//!
//! Corpus reads are lock-free against an atomically published snapshot.
//! Session mutation is serialized per session id; unrelated sessions never
//! contend. Backend calls are the only external I/O and every one is bounded
//! by a per-backend timeout.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// TOML configuration loading and validation.
pub mod config;
/// The RAG orchestrator and its request state machine.
pub mod engine;
/// Generation backends and the ordered-fallback gateway.
pub mod gateway;
/// Corpus source sets, snapshots and the knowledge store.
pub mod knowledge;
/// Budget-bounded prompt composition.
pub mod prompt;
/// Lexical retrieval over corpus snapshots.
pub mod retrieval;
/// Conversation sessions, retrieval cache and eviction.
pub mod session;
/// Shared data model and error taxonomy.
pub mod types;

// Re-export the types callers touch most.
pub use config::MiqatConfig;
pub use engine::{AskError, AskOutcome, EngineOptions, RagEngine, RequestStage};
pub use gateway::{GenerationBackend, GenerationGateway, StaticBackend};
pub use knowledge::{CorpusSnapshot, KnowledgeStore, SourceSet};
pub use prompt::{PromptBudget, PromptComposer, PromptDocument};
pub use retrieval::Retriever;
pub use session::{SessionHandle, SessionStore};
pub use types::{
    ConversationTurn, CoreError, EntryCategory, GenerationRequest, GenerationResponse,
    KnowledgeEntry, Result, RetrievalResult, TurnRole,
};
