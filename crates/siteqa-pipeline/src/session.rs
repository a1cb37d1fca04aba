//! Conversation sessions.
//!
//! Each session sits behind its own `tokio::sync::Mutex`, which the
//! orchestrator holds for the duration of a query. Tokio's mutex is fair, so
//! queries on one session finish in the order they were submitted while other
//! sessions proceed independently.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub query: String,
    pub response: String,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    turns: VecDeque<Turn>,
    max_turns: usize,
    last_access: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>, max_turns: usize) -> Self {
        Self { id: id.into(), turns: VecDeque::new(), max_turns: max_turns.max(1), last_access: Instant::now() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access.elapsed()
    }

    pub fn record(&mut self, query: impl Into<String>, response: impl Into<String>) {
        self.turns.push_back(Turn { query: query.into(), response: response.into() });
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
        self.touch();
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    max_turns: usize,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(max_turns: usize, idle_timeout: Duration) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), max_turns, idle_timeout }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The session for `id`, created on first use.
    pub fn handle(&self, id: &str) -> SessionHandle {
        let mut sessions = self.lock();
        Arc::clone(
            sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Session::new(id, self.max_turns)))),
        )
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.lock().get(id).map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions idle longer than the timeout. Sessions in use, or with a
    /// query waiting on them, are kept.
    pub fn evict_idle(&self) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        let timeout = self.idle_timeout;
        sessions.retain(|_, handle| {
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            match handle.try_lock() {
                Ok(session) => session.idle_for() < timeout,
                Err(_) => true,
            }
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!("Evicted {} idle sessions", evicted);
        }
        evicted
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
