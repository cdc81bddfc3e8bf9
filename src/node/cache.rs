//! Request-scoped node instance memoization.
//!
//! When a render pass touches the same sub-resource repeatedly — every item
//! of a collection embedding the same parent context, say — reconstructing
//! the identical ancestor chain each time is wasted work. [`NodeCache`]
//! memoizes constructed instances for the lifetime of one request, keyed by
//! `(full URL pattern, path parameters)`.
//!
//! The cache is owned by the [`RequestContext`](crate::request::RequestContext)
//! and never shared across requests: node instances carry per-request
//! resolved state (matched outputs, the request reference itself).

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::{Node, RouteParams};

/// Instances memoized within one request.
const CACHE_CAPACITY: usize = 64;

type CacheKey = (String, Vec<(String, String)>);

/// A request-scoped LRU of constructed node instances.
pub struct NodeCache {
    inner: Mutex<LruCache<CacheKey, Arc<dyn Node>>>,
}

impl NodeCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        NodeCache {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is nonzero"),
            )),
        }
    }

    /// Look up an instance by pattern and parameters.
    #[must_use]
    pub fn get(&self, pattern: &str, params: &RouteParams) -> Option<Arc<dyn Node>> {
        self.inner.lock().get(&Self::key(pattern, params)).cloned()
    }

    /// Memoize an instance.
    pub fn put(&self, pattern: &str, params: &RouteParams, node: Arc<dyn Node>) {
        self.inner.lock().put(Self::key(pattern, params), node);
    }

    fn key(pattern: &str, params: &RouteParams) -> CacheKey {
        (
            pattern.to_string(),
            params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new()
    }
}
