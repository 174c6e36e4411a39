//! Bounded LRU result cache with per-entry TTL (`spec.md` §4.8).

use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// `Get`/`Set` result cache keyed on an opaque `String` (built by
/// [`cache_key`]). Eviction is LRU-by-size; expired entries are additionally
/// pruned by [`ResultCache::remove_expired`], meant to run on a
/// `cache_ttl`-derived interval from a background task.
pub struct ResultCache<V> {
    entries: Mutex<LruCache<String, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let capacity = std::num::NonZeroUsize::new(max_size.max(1)).unwrap();
        Self { entries: Mutex::new(LruCache::new(capacity)), ttl }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        let hit = entries.get(key).filter(|e| e.expires_at > Instant::now()).map(|e| e.value.clone());
        if hit.is_none() {
            entries.pop(key);
        }
        hit
    }

    pub fn set(&self, key: String, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.lock().put(key, Entry { value, expires_at });
    }

    /// Prunes every entry whose TTL has elapsed. Returns the number removed.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> =
            entries.iter().filter(|(_, e)| e.expires_at <= now).map(|(k, _)| k.clone()).collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Key generator: concatenates `(source_text, context_hint, provider,
/// model)` and hashes, per `spec.md` §4.8.
pub fn cache_key(source_text: &str, context_hint: &str, provider: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_text.as_bytes());
    hasher.update([0u8]);
    hasher.update(context_hint.as_bytes());
    hasher.update([0u8]);
    hasher.update(provider.as_bytes());
    hasher.update([0u8]);
    hasher.update(model.as_bytes());
    hex::encode(hasher.finalize())
}

/// Spawns a background task that prunes expired entries on a fixed
/// interval until `cancel` fires.
pub fn spawn_sweeper<V: Clone + Send + Sync + 'static>(
    cache: std::sync::Arc<ResultCache<V>>,
    interval: Duration,
    cancel: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = cache.remove_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "swept expired cache entries");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_and_order_sensitive() {
        let a = cache_key("hello", "ctx", "openai", "gpt-4");
        let b = cache_key("hello", "ctx", "openai", "gpt-4");
        assert_eq!(a, b);
        let c = cache_key("hellox", "ctx", "openai", "gpt-4");
        assert_ne!(a, c);
    }

    #[test]
    fn get_returns_none_for_missing_key() {
        let cache: ResultCache<String> = ResultCache::new(10, Duration::from_secs(60));
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn set_then_get_round_trips_before_expiry() {
        let cache = ResultCache::new(10, Duration::from_secs(60));
        cache.set("k".into(), "v".to_string());
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[test]
    fn entries_beyond_capacity_evict_the_least_recently_used() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.set("a".into(), 1);
        cache.set("b".into(), 2);
        cache.get("a");
        cache.set("c".into(), 3);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn expired_entries_are_treated_as_a_miss() {
        let cache = ResultCache::new(10, Duration::from_millis(0));
        cache.set("k".into(), "v".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }
}
