//! Multi-level cache for materialized elements.
//!
//! Two key spaces share one cache: tree nodes (keyed by node index) and
//! template instantiations (keyed by template index). Template entries are
//! the higher-value ones — a hot template is referenced from many points in
//! the tree but materialized once, and every reference clones the `Arc`.
//!
//! Backed by `moka` with a byte-weight eviction policy, so a few huge
//! subtrees cannot pin the whole budget. `get_or_materialize` is
//! single-flight: concurrent readers of the same cold element run the
//! materializer once.

use std::sync::Arc;

use moka::sync::Cache;

use crate::error::{Error, Result};

use super::ElementData;

/// Cache key: which table the element came from, and its index there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Node(u32),
    Template(u32),
}

/// Per-document element cache.
pub struct ElementCache {
    cache: Cache<CacheKey, Arc<ElementData>>,
}

impl ElementCache {
    pub fn new(max_bytes: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key, value: &Arc<ElementData>| value.weight())
            .build();
        Self { cache }
    }

    /// Look up `key`, running `materialize` on a miss. Concurrent misses on
    /// the same key coalesce into one materialization.
    pub fn get_or_materialize(
        &self,
        key: CacheKey,
        materialize: impl FnOnce() -> Result<Arc<ElementData>>,
    ) -> Result<Arc<ElementData>> {
        self.cache
            .try_get_with(key, materialize)
            .map_err(|e| share_err(&e))
    }

    /// Whether `key` is currently materialized (no materialization side
    /// effect). Pending entries from an in-flight load do not count.
    pub fn contains(&self, key: CacheKey) -> bool {
        self.cache.contains_key(&key)
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl std::fmt::Debug for ElementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

/// Rebuild an owned [`Error`] from the shared one `moka` hands back when a
/// coalesced materialization fails.
fn share_err(e: &Arc<Error>) -> Error {
    match e.as_ref() {
        Error::Encoding(m) => Error::Encoding(m.clone()),
        Error::Format(m) => Error::Format(m.clone()),
        Error::Corruption(m) => Error::Corruption(m.clone()),
        Error::ChecksumMismatch { expected, actual } => Error::ChecksumMismatch {
            expected: *expected,
            actual: *actual,
        },
        Error::Resource(m) => Error::Resource(m.clone()),
        Error::UnexpectedEof {
            offset,
            need,
            context,
        } => Error::UnexpectedEof {
            offset: *offset,
            need: *need,
            context,
        },
        Error::Io(io) => Error::Io(std::io::Error::new(io.kind(), io.to_string())),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ElementType;

    fn data(tag: ElementType) -> Arc<ElementData> {
        Arc::new(ElementData {
            element_type: tag,
            properties: Vec::new(),
            children: Vec::new(),
        })
    }

    #[test]
    fn test_materialize_once() {
        let cache = ElementCache::new(1 << 20);
        let mut calls = 0;
        for _ in 0..3 {
            let got = cache
                .get_or_materialize(CacheKey::Node(7), || {
                    calls += 1;
                    Ok(data(ElementType::Text))
                })
                .unwrap();
            assert_eq!(got.element_type, ElementType::Text);
        }
        assert_eq!(calls, 1);
        assert!(cache.contains(CacheKey::Node(7)));
        assert!(!cache.contains(CacheKey::Template(7)));
    }

    #[test]
    fn test_node_and_template_keys_are_distinct() {
        let cache = ElementCache::new(1 << 20);
        cache
            .get_or_materialize(CacheKey::Node(0), || Ok(data(ElementType::Button)))
            .unwrap();
        let t = cache
            .get_or_materialize(CacheKey::Template(0), || Ok(data(ElementType::Image)))
            .unwrap();
        assert_eq!(t.element_type, ElementType::Image);
    }

    #[test]
    fn test_failed_materialization_not_cached() {
        let cache = ElementCache::new(1 << 20);
        let err = cache
            .get_or_materialize(CacheKey::Node(1), || {
                Err(Error::Corruption("bad node".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
        assert!(!cache.contains(CacheKey::Node(1)));

        // A later attempt runs again and can succeed.
        let got = cache
            .get_or_materialize(CacheKey::Node(1), || Ok(data(ElementType::Root)))
            .unwrap();
        assert_eq!(got.element_type, ElementType::Root);
    }
}
