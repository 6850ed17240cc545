//! Bounded cache of built expressions.
//!
//! Keys are explicit: the scope selection id, the schema version the scope
//! was built under and the structural hash of the expression tree.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::error::{DbError, Result};

use super::evaluator::Evaluator;

/// Cache key: `(scope selection, schema version, expression hash)`.
pub type CacheKey = (u64, u64, u64);

/// LRU cache of built evaluators.
pub struct ExpressionCache {
    cache: Mutex<LruCache<CacheKey, Evaluator>>,
}

impl std::fmt::Debug for ExpressionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionCache")
            .field("len", &self.len())
            .finish()
    }
}

impl ExpressionCache {
    /// Creates a cache; `None` when `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        let capacity = NonZeroUsize::new(capacity)?;
        Some(Self {
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Returns the cached evaluator for `key`, building and caching it on a miss.
    pub fn get_or_build(
        &self,
        key: CacheKey,
        build: impl FnOnce() -> Result<Evaluator>,
    ) -> Result<Evaluator> {
        {
            let mut cache = self.cache.lock().map_err(|_| DbError::LockPoisoned)?;
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }
        let built = build()?;
        let mut cache = self.cache.lock().map_err(|_| DbError::LockPoisoned)?;
        cache.put(key, built.clone());
        Ok(built)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}
