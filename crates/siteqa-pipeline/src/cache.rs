//! Time-bounded caches for answers and retrieval results.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Canonical form of a query for cache lookups: lower-cased, whitespace
/// collapsed, trailing sentence punctuation (`?`, `!`, `.`) removed. Other
/// symbols are kept, so "C++" and "C#" stay distinct from "C".
pub fn normalize_query(query: &str) -> String {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    collapsed.trim_end_matches(|c: char| matches!(c, '?' | '!' | '.') || c.is_whitespace()).to_string()
}

/// Response cache key, optionally scoped to a session.
pub fn response_key(normalized: &str, session_id: Option<&str>, scope_by_session: bool) -> String {
    match session_id {
        Some(id) if scope_by_session => format!("{id}\u{1f}{normalized}"),
        _ => normalized.to_string(),
    }
}

struct Entry<V> {
    value: V,
    inserted: Instant,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    generation: u64,
}

/// Thread-safe map whose entries expire after `ttl`. When full, inserting
/// evicts expired entries first, then the oldest one.
///
/// Every `clear` starts a new generation. Writers capture [`generation`]
/// before computing a value and insert with it; a value computed before a
/// clear is discarded instead of outliving it.
///
/// [`generation`]: TtlCache::generation
pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { entries: HashMap::new(), generation: 0 }),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let fresh = inner.entries.get(key).map(|e| e.inserted.elapsed() < self.ttl)?;
        if !fresh {
            inner.entries.remove(key);
            return None;
        }
        inner.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert `value` unless the cache was cleared since `generation` was
    /// read. Returns whether the value was stored.
    pub fn insert_for(&self, generation: u64, key: impl Into<String>, value: V) -> bool {
        let key = key.into();
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        let entries = &mut inner.entries;
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted.elapsed() < ttl);
            if entries.len() >= self.max_entries {
                if let Some(oldest) = entries.iter().min_by_key(|(_, e)| e.inserted).map(|(k, _)| k.clone()) {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(key, Entry { value, inserted: Instant::now() });
        true
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
