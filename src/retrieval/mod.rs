//! Deterministic lexical retrieval over a corpus snapshot.
//!
//! Scoring combines term overlap with a saturating length penalty: for each
//! query term found in an entry, the contribution is
//! `tf * (k1 + 1) / (tf + k1 * (1 - b + b * len / avg_len))`
//! with `k1 = 1.2`, `b = 0.75`. The numerator rewards overlap (more matched
//! terms and repetitions always score higher), the denominator discounts
//! long entries so a concise on-topic answer outranks a long tangential one.
//! Identical corpus and query always produce identical output: results are
//! ordered by descending score with an ascending-id tie-break.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::debug;

use crate::knowledge::CorpusSnapshot;
use crate::types::{EntryCategory, KnowledgeEntry, RetrievalResult};

/// Split text into lowercase alphanumeric terms, dropping single characters.
///
/// Shared by the retriever and the session retrieval-cache key so both agree
/// on what a query "is".
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty() && s.len() > 1)
        .map(String::from)
        .collect()
}

/// Lexical retriever. Stateless apart from its scoring parameters; every
/// search reads a caller-supplied snapshot, so searches are lock-free and
/// never observe a partially loaded corpus.
#[derive(Debug, Clone)]
pub struct Retriever {
    /// Term-frequency saturation.
    k1: f32,
    /// Length normalization strength.
    b: f32,
    /// Results scoring below this are dropped.
    min_score: f32,
}

impl Default for Retriever {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            min_score: 0.0,
        }
    }
}

impl Retriever {
    /// Retriever with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retriever with custom scoring parameters.
    pub fn with_params(k1: f32, b: f32, min_score: f32) -> Self {
        Self { k1, b, min_score }
    }

    /// Keep default scoring but drop results at or below `min_score`.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Score corpus entries against `query` and return the best `top_k`.
    ///
    /// An empty query (or one with no searchable terms) yields an empty
    /// result set so callers can short-circuit. `top_k` beyond the corpus
    /// size is clamped, not an error. A category filter narrows the
    /// candidate set before any scoring happens.
    pub fn search(
        &self,
        corpus: &CorpusSnapshot,
        query: &str,
        top_k: NonZeroUsize,
        category: Option<EntryCategory>,
    ) -> Vec<RetrievalResult> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        // Narrow before scoring.
        let candidates: Vec<Arc<KnowledgeEntry>> = corpus
            .entries()
            .filter(|e| category.is_none_or(|c| e.category == c))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let tokenized: Vec<Vec<String>> = candidates
            .iter()
            .map(|e| tokenize(&e.searchable_text()))
            .collect();
        let total_len: usize = tokenized.iter().map(Vec::len).sum();
        let avg_len = (total_len as f32 / candidates.len() as f32).max(1.0);

        let mut results: Vec<RetrievalResult> = candidates
            .iter()
            .zip(tokenized.iter())
            .filter_map(|(entry, terms)| self.score_entry(entry, terms, &query_terms, avg_len))
            .filter(|r| r.score > self.min_score)
            .collect();

        // Descending score, ascending id on ties, for reproducible output.
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        results.truncate(top_k.get().min(corpus.len()));

        debug!(
            query_terms = query_terms.len(),
            candidates = candidates.len(),
            results = results.len(),
            "retrieval complete"
        );
        results
    }

    fn score_entry(
        &self,
        entry: &Arc<KnowledgeEntry>,
        entry_terms: &[String],
        query_terms: &[String],
        avg_len: f32,
    ) -> Option<RetrievalResult> {
        if entry_terms.is_empty() {
            return None;
        }

        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        for term in entry_terms {
            *term_freq.entry(term.as_str()).or_insert(0) += 1;
        }

        let doc_len = entry_terms.len() as f32;
        let mut score = 0.0;
        let mut matched_terms = Vec::new();

        for term in query_terms {
            if matched_terms.iter().any(|m| m == term) {
                continue;
            }
            let tf = term_freq.get(term.as_str()).copied().unwrap_or(0) as f32;
            if tf == 0.0 {
                continue;
            }
            let numerator = tf * (self.k1 + 1.0);
            let denominator = tf + self.k1 * (1.0 - self.b + self.b * doc_len / avg_len);
            score += numerator / denominator;
            matched_terms.push(term.clone());
        }

        if matched_terms.is_empty() {
            return None;
        }

        Some(RetrievalResult {
            entry: Arc::clone(entry),
            score,
            matched_terms,
        })
    }
}
