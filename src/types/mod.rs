//! Core data model and error taxonomy shared across the crate.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============= Knowledge Types =============

/// Category of a knowledge entry.
///
/// The corpus is built from three curated collections: guide sections
/// (long-form travel guidance), FAQ entries, and glossary phrases with
/// transliterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryCategory {
    /// A section of a travel guide.
    Guide,
    /// A frequently asked question with its answer.
    Faq,
    /// A glossary phrase, usually with transliteration and translation.
    Phrase,
}

impl std::fmt::Display for EntryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Guide => "guide",
            Self::Faq => "faq",
            Self::Phrase => "phrase",
        };
        write!(f, "{}", name)
    }
}

/// One retrievable unit of curated source content.
///
/// Entries are immutable once loaded; a corpus reload replaces the whole
/// snapshot rather than mutating entries in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Stable identifier, unique within a corpus snapshot.
    pub id: String,
    /// Which collection the entry belongs to.
    pub category: EntryCategory,
    /// The searchable source text.
    pub text: String,
    /// BCP-47 language tag of `text`.
    #[serde(default = "default_language")]
    pub language: String,
    /// Latin-script rendering, for phrase entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transliteration: Option<String>,
    /// Translation into the traveler's language, for phrase entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl KnowledgeEntry {
    /// Convenience constructor for plain-text entries.
    pub fn new(id: impl Into<String>, category: EntryCategory, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            text: text.into(),
            language: default_language(),
            transliteration: None,
            translation: None,
        }
    }

    /// Everything searchable about the entry: the text plus, for phrases,
    /// the transliteration and translation. A traveler asking "how do I say
    /// thank you" should find the Arabic phrase through its translation.
    pub fn searchable_text(&self) -> String {
        let mut text = self.text.clone();
        for extra in [&self.transliteration, &self.translation].into_iter().flatten() {
            text.push(' ');
            text.push_str(extra);
        }
        text
    }
}

// ============= Retrieval Types =============

/// A scored match produced by one retrieval call.
///
/// Scores are comparable only within the call that produced them; they are
/// never persisted or compared across calls.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    /// The matched corpus entry.
    pub entry: Arc<KnowledgeEntry>,
    /// Relevance score, higher is more relevant.
    pub score: f32,
    /// Query terms that matched this entry, in query order.
    pub matched_terms: Vec<String>,
}

// ============= Conversation Types =============

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The traveler asking questions.
    User,
    /// The assistant's generated answer.
    Assistant,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn in a conversation. Append-only within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Speaker role.
    pub role: TurnRole,
    /// Turn text.
    pub text: String,
    /// When the turn was appended.
    pub timestamp: DateTime<Utc>,
    /// Knowledge entry ids cited by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cited_entries: Vec<String>,
}

impl ConversationTurn {
    /// Create a user turn stamped now.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            timestamp: Utc::now(),
            cited_entries: Vec::new(),
        }
    }

    /// Create an assistant turn stamped now, with its citations.
    pub fn assistant(text: impl Into<String>, cited_entries: Vec<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            cited_entries,
        }
    }
}

// ============= Generation Types =============

/// Ephemeral request handed to the generation gateway.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Fully rendered prompt text.
    pub prompt: String,
}

impl GenerationRequest {
    /// Wrap a rendered prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

/// Successful generation outcome. Failures travel as [`CoreError`] values.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    /// Whitespace-normalized answer text.
    pub text: String,
    /// Name of the backend that produced the answer.
    pub backend: String,
    /// Wall-clock latency of the winning backend call.
    pub latency: Duration,
}

// ============= Error Types =============

/// Error taxonomy of the assistant core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Corpus load rejected, e.g. a duplicate entry id. The previously
    /// published snapshot stays in effect.
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// The prompt budget cannot hold even the bare query.
    #[error("prompt budget too small: query needs {required} characters, budget is {budget}")]
    BudgetTooSmall {
        /// Characters the query line alone requires.
        required: usize,
        /// The configured budget.
        budget: usize,
    },

    /// Every backend in the fallback chain failed.
    #[error("all generation backends exhausted; last cause: {last_cause}")]
    GenerationUnavailable {
        /// Failure reason reported by the last backend tried.
        last_cause: String,
    },

    /// A single backend call failed (connection, quota, malformed response,
    /// or timeout). Consumed by the gateway's fallback chain; callers see it
    /// only as the cause inside [`CoreError::GenerationUnavailable`].
    #[error("backend error: {0}")]
    Backend(String),

    /// Lookup of an entry or session the caller asserted to exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Filesystem failure while loading sources or persisting sessions.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in a source set or persisted state.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CoreError>;
