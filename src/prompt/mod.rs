//! Budget-bounded prompt assembly with source attribution.
//!
//! A composed prompt is a sequence of lines: retrieved fragments first
//! (score order, each tagged `[source:<entry-id>]`), then recent
//! conversation turns in chronological order, then the question itself.
//! The budget is measured in characters of the rendered prompt and is never
//! exceeded. Admission priorities differ by section:
//!
//! - the query is mandatory; if it alone cannot fit, composition fails with
//!   [`CoreError::BudgetTooSmall`];
//! - retrieval fragments are admitted highest-score first, and the first
//!   fragment that does not fit whole is truncated to the remaining budget
//!   (so a tight budget still carries the best source);
//! - history is admitted most-recent-first, so the oldest turns are the
//!   first dropped. Stale turns matter less than fresh context.

use crate::types::{ConversationTurn, CoreError, Result, RetrievalResult};

/// Truncated fragments keep at least this many characters of source text;
/// below that the fragment is dropped instead.
const MIN_FRAGMENT_CHARS: usize = 16;

/// Character budget for one composed prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBudget {
    /// Maximum characters the rendered prompt may occupy.
    pub max_chars: usize,
}

impl PromptBudget {
    /// Budget of `max_chars` characters.
    pub fn chars(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

/// A knowledge fragment included in a prompt, tagged with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFragment {
    /// Id of the knowledge entry the text came from.
    pub entry_id: String,
    /// The (possibly truncated) text included in the prompt.
    pub text: String,
    /// Whether the text was cut to fit the budget.
    pub truncated: bool,
}

/// The assembled prompt: structured parts plus the exact rendered text.
#[derive(Debug, Clone)]
pub struct PromptDocument {
    /// The user's question, verbatim.
    pub query: String,
    /// Included fragments in descending relevance order.
    pub fragments: Vec<SourceFragment>,
    /// Included turns in chronological order.
    pub history: Vec<ConversationTurn>,
    rendered: String,
}

impl PromptDocument {
    /// The rendered prompt handed to a generation backend.
    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    /// Character length of the rendered prompt.
    pub fn len_chars(&self) -> usize {
        self.rendered.chars().count()
    }

    /// Entry ids cited by this prompt, in inclusion order.
    pub fn cited_entry_ids(&self) -> Vec<String> {
        self.fragments.iter().map(|f| f.entry_id.clone()).collect()
    }
}

/// Deterministic prompt composer.
#[derive(Debug, Clone, Default)]
pub struct PromptComposer;

impl PromptComposer {
    /// Create a composer.
    pub fn new() -> Self {
        Self
    }

    /// Assemble a prompt from the query, retrieval results (descending
    /// score) and recent turns (chronological, most recent last).
    pub fn compose(
        &self,
        query: &str,
        results: &[RetrievalResult],
        recent_turns: &[ConversationTurn],
        budget: PromptBudget,
    ) -> Result<PromptDocument> {
        let query_line = format!("Question: {}", single_line(query));
        let query_cost = char_len(&query_line);
        if query_cost > budget.max_chars {
            return Err(CoreError::BudgetTooSmall {
                required: query_cost,
                budget: budget.max_chars,
            });
        }
        let mut remaining = budget.max_chars - query_cost;

        // Retrieval fragments, best first. Every extra line costs its own
        // length plus the joining newline.
        let mut fragments = Vec::new();
        let mut fragment_lines = Vec::new();
        for result in results {
            let text = single_line(&result.entry.searchable_text());
            let header = format!("[source:{}] ", result.entry.id);
            let full_line_cost = char_len(&header) + char_len(&text) + 1;

            if full_line_cost <= remaining {
                remaining -= full_line_cost;
                fragment_lines.push(format!("{}{}", header, text));
                fragments.push(SourceFragment {
                    entry_id: result.entry.id.clone(),
                    text,
                    truncated: false,
                });
                continue;
            }

            // Truncate the marginal fragment if a useful amount still fits.
            let available = remaining.saturating_sub(char_len(&header) + 1);
            if available >= MIN_FRAGMENT_CHARS {
                let cut = take_chars(&text, available);
                remaining -= char_len(&header) + char_len(&cut) + 1;
                fragment_lines.push(format!("{}{}", header, cut));
                fragments.push(SourceFragment {
                    entry_id: result.entry.id.clone(),
                    text: cut,
                    truncated: true,
                });
            }
            break;
        }

        // History, most recent first; a turn either fits whole or marks the
        // cutoff. Collected newest-to-oldest, then reversed for rendering.
        let mut admitted = Vec::new();
        for turn in recent_turns.iter().rev() {
            let line = format!("{}: {}", turn.role, single_line(&turn.text));
            let cost = char_len(&line) + 1;
            if cost > remaining {
                break;
            }
            remaining -= cost;
            admitted.push((line, turn.clone()));
        }
        admitted.reverse();

        let mut lines = fragment_lines;
        let mut history = Vec::with_capacity(admitted.len());
        for (line, turn) in admitted {
            lines.push(line);
            history.push(turn);
        }
        lines.push(query_line);
        let rendered = lines.join("\n");

        debug_assert!(rendered.chars().count() <= budget.max_chars);

        Ok(PromptDocument {
            query: query.to_string(),
            fragments,
            history,
            rendered,
        })
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Collapse all whitespace runs to single spaces so every prompt part is a
/// single line.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `n` characters of `s`, respecting char boundaries.
fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
