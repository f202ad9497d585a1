//! Decoded document cache
//!
//! Keeps decoded trees keyed by (model, content hash) so an input shared by
//! many pairs, such as a common baseline, is decoded once.

use std::sync::Arc;

use super::{CachePolicy, CacheStats, TtlCache};
use crate::document::Document;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub model: String,
    pub content: u64,
}

impl DocumentKey {
    pub fn new(model: impl Into<String>, content: u64) -> Self {
        Self {
            model: model.into(),
            content,
        }
    }
}

#[derive(Clone)]
pub struct DocumentCache {
    inner: TtlCache<DocumentKey, Document>,
}

impl Default for DocumentCache {
    fn default() -> Self {
        Self::new(CachePolicy::documents())
    }
}

impl DocumentCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            inner: TtlCache::new(policy),
        }
    }

    pub fn get(&self, key: &DocumentKey) -> Option<Arc<Document>> {
        self.inner.get(key)
    }

    pub fn put(&self, key: DocumentKey, document: Document) -> Arc<Document> {
        self.inner.put(key, document)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&self) -> usize {
        self.inner.clear()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::content_hash;
    use crate::document::{Decoder, JsonDecoder};

    #[test]
    fn test_document_is_shared_by_model_and_content() {
        let cache = DocumentCache::default();
        let raw = br#"{"A":1}"#;
        let doc = JsonDecoder::new().decode("json", raw).unwrap();

        let stored = cache.put(DocumentKey::new("json", content_hash(raw)), doc);
        let fetched = cache.get(&DocumentKey::new("json", content_hash(raw))).unwrap();
        assert!(Arc::ptr_eq(&stored, &fetched));

        assert!(cache.get(&DocumentKey::new("xml", content_hash(raw))).is_none());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }
}
