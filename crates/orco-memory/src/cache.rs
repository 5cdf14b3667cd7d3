//! Bounded, TTL-expiring cache for memory retrieval results.
//!
//! Keyed by `(message_prefix, trigger_set)`, capacity 20 entries, TTL 5
//! minutes (both configurable). Writes are serialized behind a `Mutex` —
//! retrieval is infrequent enough that lock contention isn't a concern.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::types::RetrievedNode;

/// Composite cache key: the normalized search query prefix plus the set
/// of trigger keywords that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Truncated, lowercased message prefix.
    pub message_prefix: String,
    /// Sorted trigger keywords that led to this query.
    pub triggers: Vec<String>,
}

impl CacheKey {
    /// Build a key from a raw message and trigger set, normalizing both.
    #[must_use]
    pub fn new(message: &str, mut triggers: Vec<String>) -> Self {
        const PREFIX_LEN: usize = 120;
        triggers.sort();
        triggers.dedup();
        let prefix: String = message.to_lowercase().chars().take(PREFIX_LEN).collect();
        Self {
            message_prefix: prefix,
            triggers,
        }
    }
}

struct Entry {
    nodes: Vec<RetrievedNode>,
    relations_text: String,
    inserted_at: Instant,
}

/// LRU-evicted, TTL-expiring cache of retrieval results.
pub struct RetrievalCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
}

struct Inner {
    entries: HashMap<CacheKey, Entry>,
    order: Vec<CacheKey>,
}

impl Default for RetrievalCache {
    fn default() -> Self {
        Self::new(20, Duration::from_secs(5 * 60))
    }
}

impl RetrievalCache {
    /// Build a cache bounded to `capacity` entries with the given `ttl`.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
            capacity,
            ttl,
        }
    }

    /// Fetch a cached result, evicting it first if it has expired.
    pub async fn get(&self, key: &CacheKey) -> Option<(Vec<RetrievedNode>, String)> {
        let mut inner = self.inner.lock().await;
        let expired = inner
            .entries
            .get(key)
            .is_some_and(|e| e.inserted_at.elapsed() > self.ttl);
        if expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }
        if let Some(entry) = inner.entries.get(key) {
            let result = (entry.nodes.clone(), entry.relations_text.clone());
            touch(&mut inner.order, key);
            return Some(result);
        }
        None
    }

    /// Insert or refresh a cached result, trimming to capacity (LRU).
    pub async fn put(&self, key: CacheKey, nodes: Vec<RetrievedNode>, relations_text: String) {
        let mut inner = self.inner.lock().await;
        inner.entries.insert(
            key.clone(),
            Entry {
                nodes,
                relations_text,
                inserted_at: Instant::now(),
            },
        );
        touch(&mut inner.order, &key);

        while inner.order.len() > self.capacity {
            let oldest = inner.order.remove(0);
            inner.entries.remove(&oldest);
        }
    }

    /// Number of live (possibly stale) entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

fn touch(order: &mut Vec<CacheKey>, key: &CacheKey) {
    order.retain(|k| k != key);
    order.push(key.clone());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> RetrievedNode {
        RetrievedNode {
            name: name.into(),
            entity_type: "concept".into(),
            observations: vec![],
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = RetrievalCache::new(20, Duration::from_secs(300));
        let key = CacheKey::new("hello world", vec!["greeting".into()]);
        cache.put(key.clone(), vec![node("greeting")], "no relations".into()).await;

        let (nodes, text) = cache.get(&key).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(text, "no relations");
    }

    #[tokio::test]
    async fn evicts_oldest_beyond_capacity() {
        let cache = RetrievalCache::new(2, Duration::from_secs(300));
        for i in 0..3 {
            let key = CacheKey::new(&format!("msg {i}"), vec![]);
            cache.put(key, vec![node("x")], String::new()).await;
        }
        assert_eq!(cache.len().await, 2);
        let first_key = CacheKey::new("msg 0", vec![]);
        assert!(cache.get(&first_key).await.is_none());
    }

    #[tokio::test]
    async fn expires_past_ttl() {
        let cache = RetrievalCache::new(20, Duration::from_millis(10));
        let key = CacheKey::new("hello", vec![]);
        cache.put(key.clone(), vec![node("x")], String::new()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[test]
    fn cache_key_normalizes_and_sorts_triggers() {
        let a = CacheKey::new("Hello World", vec!["b".into(), "a".into()]);
        let b = CacheKey::new("hello world", vec!["a".into(), "b".into()]);
        assert_eq!(a, b);
    }
}
