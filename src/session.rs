use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use spendlog_core::{MonthlyExpenses, YearMonth};

use crate::extraction::ExtractedExpense;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Conversation state for one client: transcript, the expense awaiting
/// confirmation, and month reads memoized until the next write.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    owner: String,
    messages: Vec<ChatMessage>,
    pending: Option<ExtractedExpense>,
    /// Month reads tagged with the owner's write generation they were taken at.
    month_cache: HashMap<YearMonth, (u64, MonthlyExpenses)>,
}

impl Session {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            messages: Vec::new(),
            pending: None,
            month_cache: HashMap::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn pending(&self) -> Option<&ExtractedExpense> {
        self.pending.as_ref()
    }

    pub(crate) fn set_pending(&mut self, expense: ExtractedExpense) {
        self.pending = Some(expense);
    }

    pub(crate) fn take_pending(&mut self) -> Option<ExtractedExpense> {
        self.pending.take()
    }

    pub(crate) fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
    }

    pub(crate) fn cached_month(&self, month: YearMonth, generation: u64) -> Option<&MonthlyExpenses> {
        self.month_cache
            .get(&month)
            .filter(|(seen, _)| *seen == generation)
            .map(|(_, monthly)| monthly)
    }

    pub(crate) fn cache_month(&mut self, month: YearMonth, generation: u64, expenses: MonthlyExpenses) {
        self.month_cache.insert(month, (generation, expenses));
    }
}

/// Sessions untouched for this long are dropped on the next create.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Creating one more evicts the owner's least recently used session.
pub const DEFAULT_MAX_PER_OWNER: usize = 16;

struct Entry {
    owner: String,
    session: Arc<Mutex<Session>>,
    /// Milliseconds since the store's epoch at the last lookup.
    last_used: AtomicU64,
}

/// Live sessions keyed by id. Each session sits behind its own async mutex,
/// so requests for one session run one at a time.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Entry>>,
    epoch: Instant,
    idle_timeout: Duration,
    max_per_owner: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_PER_OWNER)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(idle_timeout: Duration, max_per_owner: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            epoch: Instant::now(),
            idle_timeout,
            max_per_owner: max_per_owner.max(1),
        }
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Registers a new session. Idle sessions of every owner are swept first,
    /// then the owner's least recently used ones until it is under its cap.
    pub async fn create(&self, owner: &str) -> SessionId {
        let session = Session::new(owner);
        let id = session.id();
        let now = self.now_millis();
        let idle_millis = u64::try_from(self.idle_timeout.as_millis()).unwrap_or(u64::MAX);

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| now.saturating_sub(entry.last_used.load(Ordering::Relaxed)) <= idle_millis);

        let mut owned: Vec<(u64, SessionId)> = sessions
            .iter()
            .filter(|(_, entry)| entry.owner == owner)
            .map(|(id, entry)| (entry.last_used.load(Ordering::Relaxed), *id))
            .collect();
        owned.sort_unstable();
        let excess = (owned.len() + 1).saturating_sub(self.max_per_owner);
        for (_, stale) in owned.into_iter().take(excess) {
            sessions.remove(&stale);
        }

        let evicted = before - sessions.len();
        if evicted > 0 {
            metrics::counter!("spendlog_sessions_evicted_total", evicted as u64);
            tracing::debug!(evicted, "Sessions evicted");
        }

        sessions.insert(
            id,
            Entry {
                owner: owner.to_string(),
                session: Arc::new(Mutex::new(session)),
                last_used: AtomicU64::new(now),
            },
        );
        tracing::debug!(owner, %id, "Session created");
        id
    }

    /// The session, if it exists and belongs to `owner`.
    pub async fn get(&self, id: SessionId, owner: &str) -> Option<Arc<Mutex<Session>>> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(&id).filter(|entry| entry.owner == owner)?;
        entry.last_used.store(self.now_millis(), Ordering::Relaxed);
        Some(entry.session.clone())
    }

    /// Ends a session. Returns false when it does not exist or belongs to
    /// someone else.
    pub async fn remove(&self, id: SessionId, owner: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&id) {
            Some(entry) if entry.owner == owner => {
                sessions.remove(&id);
                tracing::debug!(owner, %id, "Session ended");
                true
            }
            _ => false,
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_are_invisible_to_other_owners() {
        let store = SessionStore::new();
        let id = store.create("ana").await;

        assert!(store.get(id, "ana").await.is_some());
        assert!(store.get(id, "bruno").await.is_none());
        assert!(store.get(Uuid::new_v4(), "ana").await.is_none());
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn remove_is_owner_checked() {
        let store = SessionStore::new();
        let id = store.create("ana").await;

        assert!(!store.remove(id, "bruno").await);
        assert_eq!(store.count().await, 1);
        assert!(store.remove(id, "ana").await);
        assert!(!store.remove(id, "ana").await);
        assert_eq!(store.count().await, 0);
        assert!(store.get(id, "ana").await.is_none());
    }

    #[tokio::test]
    async fn owner_cap_evicts_least_recently_used() {
        let store = SessionStore::with_limits(DEFAULT_IDLE_TIMEOUT, 2);
        let first = store.create("ana").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.create("ana").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let theirs = store.create("bruno").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Touching the first session makes the second the oldest.
        assert!(store.get(first, "ana").await.is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;
        let third = store.create("ana").await;

        assert!(store.get(first, "ana").await.is_some());
        assert!(store.get(second, "ana").await.is_none());
        assert!(store.get(third, "ana").await.is_some());
        assert!(store.get(theirs, "bruno").await.is_some());
        assert_eq!(store.count().await, 3);
    }

    #[tokio::test]
    async fn idle_sessions_are_swept_on_create() {
        let store = SessionStore::with_limits(Duration::from_millis(300), DEFAULT_MAX_PER_OWNER);
        for _ in 0..10 {
            store.create("ana").await;
        }
        store.create("bruno").await;
        assert_eq!(store.count().await, 11);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let fresh = store.create("ana").await;
        assert_eq!(store.count().await, 1);
        assert!(store.get(fresh, "ana").await.is_some());
    }

    #[tokio::test]
    async fn session_handle_is_shared() {
        let store = SessionStore::new();
        let id = store.create("ana").await;

        let first = store.get(id, "ana").await.unwrap();
        first.lock().await.push(Role::User, "hello");

        let second = store.get(id, "ana").await.unwrap();
        let session = second.lock().await;
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.owner(), "ana");
        assert_eq!(session.id(), id);
    }
}
