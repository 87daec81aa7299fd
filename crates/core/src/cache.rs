use crate::error::QueryError;
use crate::traits::Embedder;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;

/// Canonical form of a query for cache identity: collapsed whitespace,
/// lowercased. Must stay deterministic; cache correctness depends on it.
pub fn normalize_query(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Bounded LRU cache in front of the embedding capability.
///
/// Concurrent misses for the same normalized query are coalesced through
/// an in-flight registry: the first caller computes, the rest await the
/// same cell. Neither lock is held across the embedding call.
pub struct EmbeddingCache<E> {
    embedder: E,
    entries: Mutex<LruCache<String, Arc<Vec<f32>>>>,
    in_flight: Mutex<HashMap<String, Arc<OnceCell<Arc<Vec<f32>>>>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E: Embedder> EmbeddingCache<E> {
    pub fn new(embedder: E, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            embedder,
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Returns the cached vector for the normalized query, refreshing its
    /// recency, or computes it once and stores it, evicting the least
    /// recently used entry when at capacity.
    pub async fn get_or_embed(&self, query: &str) -> Result<Arc<Vec<f32>>, QueryError> {
        let key = normalize_query(query);

        if let Some(vector) = locked(&self.entries).get(&key) {
            return Ok(Arc::clone(vector));
        }

        let cell = Arc::clone(
            locked(&self.in_flight)
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let result = cell
            .get_or_try_init(|| async {
                let vector = self.embedder.embed(&key).await?;
                Ok::<_, QueryError>(Arc::new(vector))
            })
            .await
            .map(Arc::clone);

        locked(&self.in_flight).remove(&key);
        let vector = result?;
        locked(&self.entries).push(key, Arc::clone(&vector));
        Ok(vector)
    }

    pub fn contains(&self, query: &str) -> bool {
        locked(&self.entries).contains(&normalize_query(query))
    }

    pub fn len(&self) -> usize {
        locked(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingEmbedder {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn dimensions(&self) -> usize {
            4
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            // Deterministic per-text vector so hits are verifiable.
            let seed = text.len() as f32;
            Ok(vec![seed, seed + 1.0, seed + 2.0, seed + 3.0])
        }
    }

    #[tokio::test]
    async fn repeated_lookups_hit_the_capability_once() {
        let cache = EmbeddingCache::new(CountingEmbedder::new(), 8);
        let first = cache.get_or_embed("Qual o prazo?").await.expect("embed");
        for _ in 0..4 {
            let again = cache.get_or_embed("qual  o prazo?").await.expect("embed");
            assert_eq!(again, first);
        }
        assert_eq!(cache.embedder().call_count(), 1);
    }

    #[tokio::test]
    async fn eviction_follows_access_order() {
        let cache = EmbeddingCache::new(CountingEmbedder::new(), 2);
        for query in ["a", "b", "c", "a"] {
            cache.get_or_embed(query).await.expect("embed");
        }
        assert!(cache.contains("c"));
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn recent_entry_survives_capacity_pressure() {
        let cache = EmbeddingCache::new(CountingEmbedder::new(), 2);
        cache.get_or_embed("a").await.expect("embed");
        cache.get_or_embed("b").await.expect("embed");
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get_or_embed("a").await.expect("embed");
        cache.get_or_embed("c").await.expect("embed");
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[tokio::test]
    async fn concurrent_misses_for_one_query_are_coalesced() {
        let cache = std::sync::Arc::new(EmbeddingCache::new(
            CountingEmbedder::slow(Duration::from_millis(30)),
            8,
        ));

        let left = {
            let cache = std::sync::Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_embed("mesma consulta").await })
        };
        let right = {
            let cache = std::sync::Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_embed("mesma  consulta").await })
        };

        let first = left.await.expect("join").expect("embed");
        let second = right.await.expect("join").expect("embed");
        assert_eq!(first, second);
        assert_eq!(cache.embedder().call_count(), 1);
    }

    #[tokio::test]
    async fn normalization_is_canonical() {
        assert_eq!(normalize_query("  Qual   O  Prazo? "), "qual o prazo?");
        assert_eq!(normalize_query("qual o prazo?"), "qual o prazo?");
    }
}
