//! Result cache, keyed by a SHA3-256 fingerprint of the task's program,
//! entry point, and canonicalized arguments.
//!
//! Only successful results are cached. Entries expire by TTL and are
//! evicted least-recently-used once the cache is at capacity.

use sha3::{Digest, Sha3_256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

pub fn fingerprint(program: &[u8], entry_point: &str, args: &[serde_json::Value]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(program);
    hasher.update(entry_point.as_bytes());
    // serde_json serializes object keys in sorted order (no preserve_order
    // feature enabled), so this is a stable canonical form.
    let canonical = serde_json::to_vec(args).unwrap_or_default();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

struct Entry {
    value: serde_json::Value,
    inserted_at: Instant,
    ttl: Duration,
}

struct Inner {
    entries: HashMap<String, Entry>,
    /// Most-recently-used at the back.
    order: VecDeque<String>,
    capacity: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ResultCache {
    inner: Mutex<Inner>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { entries: HashMap::new(), order: VecDeque::new(), capacity }),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn touch(inner: &mut Inner, key: &str) {
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
        }
        inner.order.push_back(key.to_string());
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > entry.ttl,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            inner.entries.remove(key);
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                inner.order.remove(pos);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Self::touch(&mut inner, key);
        self.hits.fetch_add(1, Ordering::Relaxed);
        inner.entries.get(key).map(|e| e.value.clone())
    }

    pub fn put(&self, key: String, value: serde_json::Value, ttl: Option<Duration>) {
        let mut inner = self.inner.lock().unwrap();
        let ttl = ttl.unwrap_or(self.default_ttl);
        inner.entries.insert(key.clone(), Entry { value, inserted_at: Instant::now(), ttl });
        Self::touch(&mut inner, &key);
        while inner.entries.len() > inner.capacity {
            if let Some(lru) = inner.order.pop_front() {
                inner.entries.remove(&lru);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            entries: inner.entries.len(),
            capacity: inner.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_identical_inputs() {
        let a = fingerprint(b"prog", "main", &[serde_json::json!(1)]);
        let b = fingerprint(b"prog", "main", &[serde_json::json!(1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_when_args_differ() {
        let a = fingerprint(b"prog", "main", &[serde_json::json!(1)]);
        let b = fingerprint(b"prog", "main", &[serde_json::json!(2)]);
        assert_ne!(a, b);
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = ResultCache::new(4, Duration::from_secs(60));
        cache.put("k".to_string(), serde_json::json!("v"), None);
        assert_eq!(cache.get("k"), Some(serde_json::json!("v")));
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let cache = ResultCache::new(4, Duration::from_secs(60));
        cache.put("k".to_string(), serde_json::json!("v"), Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn stats_count_hits_and_misses_separately() {
        let cache = ResultCache::new(4, Duration::from_secs(60));
        cache.put("k".to_string(), serde_json::json!("v"), None);
        cache.get("k");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn eviction_removes_the_least_recently_used_entry() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.put("a".to_string(), serde_json::json!(1), None);
        cache.put("b".to_string(), serde_json::json!(2), None);
        cache.get("a"); // touch a, making b the LRU
        cache.put("c".to_string(), serde_json::json!(3), None);
        assert_eq!(cache.get("b"), None);
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }
}
