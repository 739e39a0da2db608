use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::{EmbeddingModel, EmbeddingService, InputType};

type CacheKey = (EmbeddingModel, InputType, String);

/// LRU in front of another embedding service.
///
/// Only successful embeddings are cached. The lock is never held across the
/// remote call.
pub struct CachedEmbeddings {
    inner: Arc<dyn EmbeddingService>,
    cache: Option<Mutex<lru::LruCache<CacheKey, Vec<f32>>>>,
}

impl CachedEmbeddings {
    /// `capacity == 0` disables caching.
    pub fn new(inner: Arc<dyn EmbeddingService>, capacity: usize) -> Self {
        Self {
            inner,
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(lru::LruCache::new(cap))),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.as_ref().map(|c| c.lock().len()).unwrap_or(0)
    }
}

#[async_trait]
impl EmbeddingService for CachedEmbeddings {
    async fn embed(&self, text: &str, model: EmbeddingModel, input_type: InputType) -> Result<Vec<f32>> {
        let Some(cache) = &self.cache else {
            return self.inner.embed(text, model, input_type).await;
        };

        let key = (model, input_type, text.to_string());
        let hit = cache.lock().get(&key).cloned();
        if let Some(hit) = hit {
            tracing::debug!(model = %model, "Embedding cache hit");
            return Ok(hit);
        }

        let vector = self.inner.embed(text, model, input_type).await?;
        cache.lock().put(key, vector.clone());
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::CountingEmbeddings;

    #[tokio::test]
    async fn test_repeated_text_hits_cache() {
        let inner = Arc::new(CountingEmbeddings::new());
        let cached = CachedEmbeddings::new(inner.clone(), 2);

        let a = cached.embed("alien", EmbeddingModel::Cohere, InputType::SearchQuery).await.unwrap();
        let b = cached.embed("alien", EmbeddingModel::Cohere, InputType::SearchQuery).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(inner.calls(), 1);

        // different input type is a different key
        cached.embed("alien", EmbeddingModel::Cohere, InputType::SearchDocument).await.unwrap();
        assert_eq!(inner.calls(), 2);
        assert_eq!(cached.cached_len(), 2);
    }

    #[tokio::test]
    async fn test_zero_capacity_disables_cache() {
        let inner = Arc::new(CountingEmbeddings::new());
        let cached = CachedEmbeddings::new(inner.clone(), 0);
        for _ in 0..3 {
            cached.embed("x", EmbeddingModel::Titan, InputType::SearchQuery).await.unwrap();
        }
        assert_eq!(inner.calls(), 3);
        assert_eq!(cached.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let inner = Arc::new(CountingEmbeddings::failing());
        let cached = CachedEmbeddings::new(inner.clone(), 4);
        assert!(cached.embed("x", EmbeddingModel::Cohere, InputType::SearchQuery).await.is_err());
        assert!(cached.embed("x", EmbeddingModel::Cohere, InputType::SearchQuery).await.is_err());
        assert_eq!(inner.calls(), 2);
        assert_eq!(cached.cached_len(), 0);
    }
}
