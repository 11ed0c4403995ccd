//! Conversation state: per-session history, retrieval cache, and idle
//! eviction.
//!
//! The store keeps one [`SessionHandle`] per session id in a map guarded by
//! a `parking_lot::RwLock`; each handle serializes mutation of its own state
//! through a `tokio::sync::Mutex`. Two callers appending to the same session
//! therefore never interleave (the second waits), while different sessions
//! never contend - there is no global write lock around session state.
//!
//! A session untouched for longer than the idle threshold is replaced by a
//! fresh empty one on the next `get_or_create`; sessions never merge.
//! Persistence round-trips turn order and role exactly; the per-session
//! retrieval cache is ephemeral and not persisted.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::retrieval::tokenize;
use crate::types::{ConversationTurn, Result, RetrievalResult};

/// Default idle threshold before a session is considered abandoned.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(1800);

/// Default capacity of the per-session retrieval cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

const PERSIST_FORMAT: u32 = 1;

// ============================================================================
// Retrieval Cache Key
// ============================================================================

/// Key for the per-session retrieval cache.
///
/// Keyed by corpus version so a reload naturally invalidates cached results;
/// the query is normalized to its term sequence so trivially different
/// spellings of the same query share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetrievalCacheKey {
    corpus_version: u64,
    query: String,
}

impl RetrievalCacheKey {
    /// Build a key from the published corpus version and a raw query.
    pub fn new(corpus_version: u64, raw_query: &str) -> Self {
        Self {
            corpus_version,
            query: tokenize(raw_query).join(" "),
        }
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Mutable state of one session. Only reachable through a locked
/// [`SessionGuard`], so all mutation is serialized per session.
pub struct SessionState {
    turns: Vec<ConversationTurn>,
    retrieval_cache: LruCache<RetrievalCacheKey, Vec<RetrievalResult>>,
}

impl SessionState {
    fn new(cache_capacity: NonZeroUsize) -> Self {
        Self {
            turns: Vec::new(),
            retrieval_cache: LruCache::new(cache_capacity),
        }
    }

    /// Append a turn. Turns are append-only; existing turns never change.
    pub fn append_turn(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// All turns in append order.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The last `max_count` turns, ordered most recent last.
    pub fn recent_turns(&self, max_count: usize) -> Vec<ConversationTurn> {
        let start = self.turns.len().saturating_sub(max_count);
        self.turns[start..].to_vec()
    }

    /// Cached retrieval results for `key`, if still present.
    pub fn cached_retrieval(&mut self, key: &RetrievalCacheKey) -> Option<Vec<RetrievalResult>> {
        self.retrieval_cache.get(key).cloned()
    }

    /// Remember retrieval results for `key`.
    pub fn cache_retrieval(&mut self, key: RetrievalCacheKey, results: Vec<RetrievalResult>) {
        self.retrieval_cache.put(key, results);
    }
}

// ============================================================================
// Session Handle
// ============================================================================

/// Shared handle to one session.
pub struct SessionHandle {
    id: String,
    /// Unix millis of the last access; read lock-free by eviction.
    last_activity_ms: AtomicI64,
    state: Mutex<SessionState>,
}

impl SessionHandle {
    fn new(id: String, cache_capacity: NonZeroUsize) -> Self {
        Self {
            id,
            last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            state: Mutex::new(SessionState::new(cache_capacity)),
        }
    }

    /// The session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the session was last accessed.
    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity_ms.load(Ordering::Relaxed))
            .unwrap_or_else(Utc::now)
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn is_idle(&self, threshold: Duration) -> bool {
        let elapsed =
            Utc::now().timestamp_millis() - self.last_activity_ms.load(Ordering::Relaxed);
        elapsed > threshold.as_millis() as i64
    }

    /// Lock the session for exclusive access. Held across a whole logical
    /// request; dropping the guard (including on cancellation) releases the
    /// lock promptly and counts as activity.
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            handle: self,
            state: self.state.lock().await,
        }
    }
}

/// Exclusive access to a session's state; touches the session when dropped.
pub struct SessionGuard<'a> {
    handle: &'a SessionHandle,
    state: MutexGuard<'a, SessionState>,
}

impl Deref for SessionGuard<'_> {
    type Target = SessionState;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.handle.touch();
    }
}

// ============================================================================
// Session Store
// ============================================================================

/// Owner of all conversation sessions.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    idle_threshold: Duration,
    cache_capacity: NonZeroUsize,
}

impl SessionStore {
    /// Store with the given idle threshold and retrieval-cache capacity.
    pub fn new(idle_threshold: Duration, cache_capacity: NonZeroUsize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_threshold,
            cache_capacity,
        }
    }

    /// Store with default policy.
    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_IDLE_THRESHOLD,
            NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).expect("nonzero constant"),
        )
    }

    /// Fetch the session for `session_id`, creating a fresh empty one if it
    /// does not exist or has been idle past the threshold. Never fails.
    pub fn get_or_create(&self, session_id: &str) -> Arc<SessionHandle> {
        {
            let sessions = self.sessions.read();
            if let Some(handle) = sessions.get(session_id) {
                if !handle.is_idle(self.idle_threshold) {
                    return Arc::clone(handle);
                }
            }
        }

        let mut sessions = self.sessions.write();
        // Re-check under the write lock; another caller may have won.
        if let Some(handle) = sessions.get(session_id) {
            if !handle.is_idle(self.idle_threshold) {
                return Arc::clone(handle);
            }
            debug!(session_id, "replacing idle session with a fresh one");
        } else {
            debug!(session_id, "creating session");
        }

        let handle = Arc::new(SessionHandle::new(
            session_id.to_string(),
            self.cache_capacity,
        ));
        sessions.insert(session_id.to_string(), Arc::clone(&handle));
        handle
    }

    /// Append a turn to the session, creating it if needed. Appends to the
    /// same session from concurrent callers serialize; none are lost.
    pub async fn append_turn(&self, session_id: &str, turn: ConversationTurn) {
        let handle = self.get_or_create(session_id);
        let mut session = handle.lock().await;
        session.append_turn(turn);
    }

    /// The last `max_count` turns of the session, most recent last. A
    /// non-existent session id yields an empty (freshly created) session.
    pub async fn recent_turns(
        &self,
        session_id: &str,
        max_count: usize,
    ) -> Vec<ConversationTurn> {
        let handle = self.get_or_create(session_id);
        let session = handle.lock().await;
        session.recent_turns(max_count)
    }

    /// Drop every session idle for longer than `idle_threshold`. Returns how
    /// many were evicted.
    pub fn evict_idle(&self, idle_threshold: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, handle| !handle.is_idle(idle_threshold));
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "evicted idle sessions");
        }
        evicted
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions exist.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Spawn a task that periodically evicts idle sessions using the store's
    /// configured threshold. Runs until aborted.
    pub fn start_eviction_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.evict_idle(store.idle_threshold);
            }
        })
    }

    /// Persist all sessions as JSON. Turn order and role round-trip exactly.
    pub async fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let handles: Vec<Arc<SessionHandle>> = {
            let sessions = self.sessions.read();
            let mut handles: Vec<_> = sessions.values().cloned().collect();
            handles.sort_by(|a, b| a.id.cmp(&b.id));
            handles
        };

        let persisted = futures::future::join_all(handles.iter().map(|handle| async {
            let state = handle.state.lock().await;
            PersistedSession {
                id: handle.id.clone(),
                last_activity: handle.last_activity(),
                turns: state.turns.clone(),
            }
        }))
        .await;

        let doc = PersistedStore {
            format: PERSIST_FORMAT,
            sessions: persisted,
        };
        let json = serde_json::to_string_pretty(&doc)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Restore a store previously written by [`SessionStore::save_to`].
    pub fn load_from<P: AsRef<Path>>(
        path: P,
        idle_threshold: Duration,
        cache_capacity: NonZeroUsize,
    ) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let doc: PersistedStore = serde_json::from_str(&json)?;

        let store = Self::new(idle_threshold, cache_capacity);
        {
            let mut sessions = store.sessions.write();
            for persisted in doc.sessions {
                let handle = Arc::new(SessionHandle {
                    id: persisted.id.clone(),
                    last_activity_ms: AtomicI64::new(persisted.last_activity.timestamp_millis()),
                    state: Mutex::new(SessionState {
                        turns: persisted.turns,
                        retrieval_cache: LruCache::new(cache_capacity),
                    }),
                });
                sessions.insert(persisted.id, handle);
            }
        }
        Ok(store)
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedStore {
    format: u32,
    sessions: Vec<PersistedSession>,
}

#[derive(Serialize, Deserialize)]
struct PersistedSession {
    id: String,
    last_activity: DateTime<Utc>,
    turns: Vec<ConversationTurn>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TurnRole;

    fn small_store(idle: Duration) -> SessionStore {
        SessionStore::new(idle, NonZeroUsize::new(4).unwrap())
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_session() {
        let store = SessionStore::with_defaults();
        let a = store.get_or_create("s1");
        let b = store.get_or_create("s1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_append_and_recent_order() {
        let store = SessionStore::with_defaults();
        store
            .append_turn("s1", ConversationTurn::user("first"))
            .await;
        store
            .append_turn("s1", ConversationTurn::assistant("second", vec![]))
            .await;
        store
            .append_turn("s1", ConversationTurn::user("third"))
            .await;

        let recent = store.recent_turns("s1", 2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text, "second");
        assert_eq!(recent[1].text, "third");
        assert_eq!(recent[1].role, TurnRole::User);
    }

    #[tokio::test]
    async fn test_unknown_session_yields_fresh_empty() {
        let store = SessionStore::with_defaults();
        let recent = store.recent_turns("never-seen", 10).await;
        assert!(recent.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_lose_nothing() {
        let store = Arc::new(SessionStore::with_defaults());

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .append_turn("shared", ConversationTurn::user(format!("turn {}", i)))
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let turns = store.recent_turns("shared", 100).await;
        assert_eq!(turns.len(), 16);
        // Every append survived in some serialized order.
        for i in 0..16 {
            assert!(turns.iter().any(|t| t.text == format!("turn {}", i)));
        }
    }

    #[tokio::test]
    async fn test_idle_session_replaced_on_get_or_create() {
        let store = small_store(Duration::from_millis(10));
        store
            .append_turn("s1", ConversationTurn::user("hello"))
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        let handle = store.get_or_create("s1");
        let session = handle.lock().await;
        assert!(session.turns().is_empty(), "expected a fresh session");
    }

    #[tokio::test]
    async fn test_evict_idle_removes_only_stale() {
        let store = small_store(Duration::from_secs(3600));
        store.append_turn("old", ConversationTurn::user("hi")).await;
        store.append_turn("new", ConversationTurn::user("hi")).await;

        // Backdate one session well past any threshold.
        {
            let sessions = store.sessions.read();
            sessions["old"]
                .last_activity_ms
                .store(0, Ordering::Relaxed);
        }

        let evicted = store.evict_idle(Duration::from_secs(60));
        assert_eq!(evicted, 1);
        assert_eq!(store.len(), 1);

        let fresh = store.recent_turns("old", 10).await;
        assert!(fresh.is_empty());
    }

    #[tokio::test]
    async fn test_background_eviction_task() {
        let store = Arc::new(small_store(Duration::from_millis(10)));
        store.append_turn("s1", ConversationTurn::user("hi")).await;

        let task = store.start_eviction_task(Duration::from_millis(15));
        tokio::time::sleep(Duration::from_millis(80)).await;
        task.abort();

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_cache_roundtrip() {
        let store = SessionStore::with_defaults();
        let handle = store.get_or_create("s1");
        let mut session = handle.lock().await;

        let key = RetrievalCacheKey::new(3, "What visa do I need?");
        assert!(session.cached_retrieval(&key).is_none());

        session.cache_retrieval(key.clone(), Vec::new());
        assert!(session.cached_retrieval(&key).is_some());

        // Same terms, different punctuation: same key.
        let alike = RetrievalCacheKey::new(3, "what VISA do i need");
        assert_eq!(key, alike);

        // A new corpus version misses.
        let bumped = RetrievalCacheKey::new(4, "What visa do I need?");
        assert!(session.cached_retrieval(&bumped).is_none());
    }

    #[tokio::test]
    async fn test_persistence_roundtrip_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::with_defaults();
        store
            .append_turn("s1", ConversationTurn::user("what is tawaf?"))
            .await;
        store
            .append_turn(
                "s1",
                ConversationTurn::assistant("Tawaf is...", vec!["guide-tawaf".to_string()]),
            )
            .await;
        store
            .append_turn("s2", ConversationTurn::user("hello"))
            .await;

        store.save_to(&path).await.unwrap();

        let restored = SessionStore::load_from(
            &path,
            DEFAULT_IDLE_THRESHOLD,
            NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap(),
        )
        .unwrap();
        assert_eq!(restored.len(), 2);

        let turns = restored.recent_turns("s1", 10).await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].text, "what is tawaf?");
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[1].cited_entries, vec!["guide-tawaf"]);
    }
}
