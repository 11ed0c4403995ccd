//! Knowledge store: immutable, versioned corpus snapshots.
//!
//! The corpus is loaded from one or more source sets (the guide, FAQ and
//! phrase collections) and published as a [`CorpusSnapshot`] behind an
//! [`arc_swap::ArcSwap`]. Readers grab the current snapshot without taking a
//! lock and keep using it for the duration of a request; a reload builds a
//! complete new snapshot first and swaps the reference in one step, so no
//! reader ever observes a half-loaded corpus.
//!
//! A duplicate entry id anywhere in the requested source sets fails the load
//! with [`CoreError::DataIntegrity`] and leaves the previously published
//! snapshot untouched.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use crate::types::{CoreError, EntryCategory, KnowledgeEntry, Result};

// ============================================================================
// Source Sets
// ============================================================================

/// A named collection of entries to load, e.g. "faq" or "guide".
#[derive(Debug, Clone)]
pub struct SourceSet {
    /// Name used in load diagnostics.
    pub name: String,
    /// The entries this set contributes.
    pub entries: Vec<KnowledgeEntry>,
}

impl SourceSet {
    /// Build a source set from in-memory entries.
    pub fn new(name: impl Into<String>, entries: Vec<KnowledgeEntry>) -> Self {
        Self {
            name: name.into(),
            entries,
        }
    }

    /// Parse a source set from a JSON array of entries.
    pub fn from_json_str(name: impl Into<String>, json: &str) -> Result<Self> {
        let entries: Vec<KnowledgeEntry> = serde_json::from_str(json)?;
        Ok(Self::new(name, entries))
    }

    /// Load a source set from a JSON file; the set is named after the
    /// file stem.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(name, &json)
    }

    /// Load every `*.json` file in a directory as a source set, in file-name
    /// order for reproducible load diagnostics.
    pub fn from_json_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<Self>> {
        let mut paths: Vec<_> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        paths.into_iter().map(Self::from_json_file).collect()
    }
}

// ============================================================================
// Corpus Snapshot
// ============================================================================

/// An immutable view of the whole corpus at one load.
///
/// Snapshots are cheap to share (`Arc` per entry) and never mutated; a
/// reload produces a new snapshot with a strictly greater version.
#[derive(Debug)]
pub struct CorpusSnapshot {
    version: u64,
    entries: Vec<Arc<KnowledgeEntry>>,
    by_id: HashMap<String, usize>,
}

impl CorpusSnapshot {
    /// The empty corpus, published before the first load.
    fn empty() -> Self {
        Self {
            version: 0,
            entries: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    fn build(version: u64, sets: &[SourceSet]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();
        // Remembers which set first claimed an id, for the error message.
        let mut owner: HashMap<String, String> = HashMap::new();

        for set in sets {
            for entry in &set.entries {
                if entry.id.trim().is_empty() {
                    return Err(CoreError::DataIntegrity(format!(
                        "source set '{}' contains an entry with an empty id",
                        set.name
                    )));
                }
                if let Some(first) = owner.get(&entry.id) {
                    return Err(CoreError::DataIntegrity(format!(
                        "duplicate entry id '{}' in source set '{}' (first seen in '{}')",
                        entry.id, set.name, first
                    )));
                }
                owner.insert(entry.id.clone(), set.name.clone());
                by_id.insert(entry.id.clone(), entries.len());
                entries.push(Arc::new(entry.clone()));
            }
        }

        Ok(Self {
            version,
            entries,
            by_id,
        })
    }

    /// Monotonically increasing corpus version; 0 is the empty pre-load
    /// snapshot.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of entries in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by id.
    pub fn get(&self, id: &str) -> Result<Arc<KnowledgeEntry>> {
        self.by_id
            .get(id)
            .map(|&idx| Arc::clone(&self.entries[idx]))
            .ok_or_else(|| CoreError::NotFound(format!("knowledge entry '{}'", id)))
    }

    /// Iterate over all entries in load order. Finite and restartable.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<KnowledgeEntry>> {
        self.entries.iter()
    }

    /// Entry counts per category, for diagnostics.
    pub fn category_counts(&self) -> HashMap<EntryCategory, usize> {
        let mut counts = HashMap::new();
        for entry in &self.entries {
            *counts.entry(entry.category).or_insert(0) += 1;
        }
        counts
    }
}

// ============================================================================
// Knowledge Store
// ============================================================================

/// Owner of the published corpus snapshot.
///
/// Constructed once at startup and handed to the orchestrator explicitly;
/// there is no ambient global corpus.
pub struct KnowledgeStore {
    current: ArcSwap<CorpusSnapshot>,
    next_version: AtomicU64,
}

impl KnowledgeStore {
    /// Create a store publishing the empty snapshot.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(CorpusSnapshot::empty()),
            next_version: AtomicU64::new(1),
        }
    }

    /// Validate and atomically publish a new corpus built from `sets`.
    ///
    /// On any validation failure nothing is published: readers keep seeing
    /// the previous snapshot.
    pub fn load(&self, sets: &[SourceSet]) -> Result<Arc<CorpusSnapshot>> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let snapshot = Arc::new(CorpusSnapshot::build(version, sets)?);
        self.current.store(Arc::clone(&snapshot));
        info!(
            version,
            entries = snapshot.len(),
            sets = sets.len(),
            "published corpus snapshot"
        );
        Ok(snapshot)
    }

    /// The currently published snapshot. Lock-free.
    pub fn snapshot(&self) -> Arc<CorpusSnapshot> {
        self.current.load_full()
    }
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}
