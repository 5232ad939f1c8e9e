//! LRU cache of labeling results with write-through persistence.
//!
//! One cache is shared (via `Arc`) by every surface in the process. It is
//! rehydrated from storage on first use and written back after each insert,
//! ordered least to most recently used.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use lumen_core::{Span, text_signature};
use serde::{Deserialize, Serialize};
use web_time::{SystemTime, UNIX_EPOCH};

use crate::config::{DEFAULT_CACHE_CAPACITY, RetrievalConfig};
use crate::error::StorageError;
use crate::retrieval::RequestOptions;
use crate::storage::{FileStorage, MemoryStorage, Storage};

/// Composite cache key: text signature plus every request option that can
/// change the labeling result.
///
/// Only the fields of [`RequestOptions`] listed here take part. Anything the
/// labeler reads from elsewhere is invisible to the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(signature: &str, options: &RequestOptions, template_version: &str) -> Self {
        let policy = serde_json::to_string(&options.policy).unwrap_or_default();
        let policy_hash = short_hash(&policy);
        let max_spans = options
            .max_spans
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".into());
        CacheKey(format!(
            "{signature}|{cache_id}|{max_spans}|{min_conf:.3}|{template_version}|{policy_hash}",
            cache_id = options.cache_id.as_deref().unwrap_or("-"),
            min_conf = options.min_confidence,
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Text signature this key was built from.
    pub fn signature(&self) -> &str {
        self.0.split('|').next().unwrap_or_default()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn short_hash(text: &str) -> String {
    let mut hex = text_signature(text);
    hex.truncate(16);
    hex
}

/// One cached labeling result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    /// Sanitized spans in logical offsets.
    pub spans: Vec<Span>,
    #[serde(default)]
    pub meta: serde_json::Value,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Canonical text the spans were validated against.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,
    pub signature: String,
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

struct Inner {
    entries: LruCache<CacheKey, CacheRecord>,
    hydrated: bool,
}

pub struct HighlightCache {
    inner: Mutex<Inner>,
    storage: Box<dyn Storage>,
}

impl fmt::Debug for HighlightCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("HighlightCache")
            .field("len", &inner.entries.len())
            .field("capacity", &inner.entries.cap())
            .field("hydrated", &inner.hydrated)
            .finish()
    }
}

impl HighlightCache {
    /// Cache of `capacity` entries (at least one) persisted to `storage`.
    pub fn new(capacity: usize, storage: impl Storage + 'static) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hydrated: false,
            }),
            storage: Box::new(storage),
        }
    }

    pub fn in_memory(capacity: usize) -> Self {
        Self::new(capacity, MemoryStorage::new())
    }

    /// File-backed when `cache_path` is set, in-memory otherwise.
    pub fn for_config(config: &RetrievalConfig) -> Self {
        match &config.cache_path {
            Some(path) => Self::new(config.cache_capacity, FileStorage::new(path)),
            None => Self::in_memory(config.cache_capacity),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock, rehydrating from storage the first time.
    fn hydrated(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.lock();
        if !inner.hydrated {
            inner.hydrated = true;
            self.rehydrate(&mut inner);
        }
        inner
    }

    fn rehydrate(&self, inner: &mut Inner) {
        let data = match self.storage.load() {
            Ok(Some(data)) => data,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(target: "lumen::cache", error = %e, "could not read cache storage");
                return;
            }
        };
        match serde_json::from_str::<Vec<(CacheKey, CacheRecord)>>(&data) {
            Ok(records) => {
                let count = records.len();
                // Stored oldest first, so the last push ends up most recent.
                for (key, record) in records {
                    inner.entries.push(key, record);
                }
                tracing::debug!(
                    target: "lumen::cache",
                    stored = count,
                    kept = inner.entries.len(),
                    "rehydrated highlight cache"
                );
            }
            Err(e) => {
                tracing::warn!(
                    target: "lumen::cache",
                    error = %e,
                    "cache storage is corrupt, clearing it"
                );
                if let Err(e) = self.storage.clear() {
                    tracing::warn!(
                        target: "lumen::cache",
                        error = %e,
                        "could not clear cache storage"
                    );
                }
            }
        }
    }

    fn persist(&self, inner: &Inner) {
        let mut records: Vec<(&CacheKey, &CacheRecord)> = inner.entries.iter().collect();
        records.reverse();
        let result = serde_json::to_string(&records)
            .map_err(StorageError::from)
            .and_then(|json| self.storage.save(&json));
        if let Err(e) = result {
            tracing::warn!(
                target: "lumen::cache",
                error = %e,
                "could not persist highlight cache, clearing storage"
            );
            if let Err(e) = self.storage.clear() {
                tracing::warn!(target: "lumen::cache", error = %e, "could not clear cache storage");
            }
        }
    }

    /// Look up a key, marking it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<CacheRecord> {
        self.hydrated().entries.get(key).cloned()
    }

    /// Look up a key without touching recency.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheRecord> {
        self.hydrated().entries.peek(key).cloned()
    }

    /// Most recently used record for a text, whatever options produced it.
    pub fn latest_for_signature(&self, signature: &str) -> Option<CacheRecord> {
        self.hydrated()
            .entries
            .iter()
            .find(|(_, record)| record.signature == signature)
            .map(|(_, record)| record.clone())
    }

    /// Insert or replace, evicting the least recently used entry beyond
    /// capacity, then write the cache through to storage.
    pub fn insert(&self, key: CacheKey, record: CacheRecord) {
        let mut inner = self.hydrated();
        if let Some((evicted, _)) = inner.entries.push(key.clone(), record) {
            if evicted != key {
                tracing::debug!(target: "lumen::cache", key = %evicted, "evicted cache entry");
            }
        }
        self.persist(&inner);
    }

    pub fn len(&self) -> usize {
        self.hydrated().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().entries.cap().get()
    }

    /// Drop every entry, in memory and in storage.
    pub fn clear(&self) {
        let mut inner = self.hydrated();
        inner.entries.clear();
        if let Err(e) = self.storage.clear() {
            tracing::warn!(target: "lumen::cache", error = %e, "could not clear cache storage");
        }
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> =
            self.hydrated().entries.iter().map(|(k, _)| k.clone()).collect();
        keys.reverse();
        keys
    }
}

impl Default for HighlightCache {
    fn default() -> Self {
        Self::in_memory(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lumen_core::Category;

    /// Storage handle that tests can inspect after the cache takes ownership.
    #[derive(Clone, Default)]
    struct Shared(Arc<MemoryStorage>);

    impl Storage for Shared {
        fn load(&self) -> Result<Option<String>, StorageError> {
            self.0.load()
        }
        fn save(&self, data: &str) -> Result<(), StorageError> {
            self.0.save(data)
        }
        fn clear(&self) -> Result<(), StorageError> {
            self.0.clear()
        }
    }

    fn key(n: usize) -> CacheKey {
        CacheKey::new(&format!("sig{n}"), &RequestOptions::default(), "v1")
    }

    fn record(n: usize) -> CacheRecord {
        CacheRecord {
            spans: vec![Span::new(0, 3, Category::Subject)],
            meta: serde_json::Value::Null,
            timestamp: n as u64,
            text: format!("text {n}"),
            cache_id: None,
            signature: format!("sig{n}"),
        }
    }

    #[test]
    fn test_key_covers_options() {
        let base = RequestOptions::default();
        let a = CacheKey::new("sig", &base, "v1");
        assert_eq!(a.signature(), "sig");
        assert_ne!(a, CacheKey::new("sig", &base, "v2"));
        let more = RequestOptions {
            max_spans: Some(3),
            ..RequestOptions::default()
        };
        assert_ne!(a, CacheKey::new("sig", &more, "v1"));
        let policy = RequestOptions {
            policy: serde_json::json!({ "mode": "image" }),
            ..RequestOptions::default()
        };
        assert_ne!(a, CacheKey::new("sig", &policy, "v1"));
        let scoped = RequestOptions {
            cache_id: Some("doc-1".into()),
            ..RequestOptions::default()
        };
        assert_ne!(a, CacheKey::new("sig", &scoped, "v1"));
    }

    #[test]
    fn test_lru_eviction_and_order() {
        let storage = Shared::default();
        let cache = HighlightCache::new(2, storage.clone());
        cache.insert(key(1), record(1));
        cache.insert(key(2), record(2));
        assert!(cache.get(&key(1)).is_some());
        cache.insert(key(3), record(3));

        assert!(cache.peek(&key(2)).is_none());
        assert_eq!(cache.keys(), vec![key(1), key(3)]);

        let stored: Vec<(CacheKey, CacheRecord)> =
            serde_json::from_str(&storage.0.contents().unwrap()).unwrap();
        let stored_keys: Vec<_> = stored.into_iter().map(|(k, _)| k).collect();
        assert_eq!(stored_keys, vec![key(1), key(3)]);
    }

    #[test]
    fn test_rehydrates_once_in_order() {
        let storage = Shared::default();
        {
            let cache = HighlightCache::new(3, storage.clone());
            cache.insert(key(1), record(1));
            cache.insert(key(2), record(2));
        }
        let cache = HighlightCache::new(3, storage.clone());
        assert_eq!(cache.get(&key(1)), Some(record(1)));
        assert_eq!(cache.keys(), vec![key(2), key(1)]);

        // Storage changes after hydration are not re-read.
        storage.0.clear().unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_rehydrate_trims_to_capacity() {
        let storage = Shared::default();
        {
            let cache = HighlightCache::new(5, storage.clone());
            for n in 0..5 {
                cache.insert(key(n), record(n));
            }
        }
        let cache = HighlightCache::new(2, storage);
        assert_eq!(cache.keys(), vec![key(3), key(4)]);
    }

    #[test]
    fn test_corrupt_storage_is_cleared() {
        let storage = Shared(Arc::new(MemoryStorage::with_contents("{definitely not json")));
        let cache = HighlightCache::new(4, storage.clone());
        assert!(cache.is_empty());
        assert_eq!(storage.0.contents(), None);
        cache.insert(key(1), record(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_latest_for_signature() {
        let cache = HighlightCache::in_memory(4);
        let scoped = RequestOptions {
            max_spans: Some(2),
            ..RequestOptions::default()
        };
        let mut older = record(7);
        older.timestamp = 1;
        cache.insert(CacheKey::new("sig7", &scoped, "v1"), older);
        cache.insert(key(7), record(7));
        assert_eq!(cache.latest_for_signature("sig7").unwrap().timestamp, 7);
        assert!(cache.latest_for_signature("nope").is_none());
    }

    #[test]
    fn test_record_wire_shape() {
        let json = serde_json::to_value(record(1)).unwrap();
        assert!(json.get("cacheId").is_none());
        assert_eq!(json["signature"], "sig1");
        assert_eq!(json["spans"][0]["category"], "subject");
    }

    /// Storage whose writes always fail, with a prior snapshot in place.
    #[derive(Clone)]
    struct ReadOnly {
        inner: Shared,
        clears: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Storage for ReadOnly {
        fn load(&self) -> Result<Option<String>, StorageError> {
            self.inner.load()
        }
        fn save(&self, _data: &str) -> Result<(), StorageError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }
        fn clear(&self) -> Result<(), StorageError> {
            self.clears.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.clear()
        }
    }

    #[test]
    fn test_failed_write_clears_storage_and_keeps_serving() {
        let seeded = Shared::default();
        HighlightCache::new(4, seeded.clone()).insert(key(1), record(1));
        assert!(seeded.0.contents().is_some());

        let storage = ReadOnly {
            inner: seeded.clone(),
            clears: Arc::default(),
        };
        let cache = HighlightCache::new(4, storage.clone());
        cache.insert(key(2), record(2));

        assert_eq!(storage.clears.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(seeded.0.contents(), None);
        // The in-memory side is unaffected.
        assert_eq!(cache.get(&key(1)), Some(record(1)));
        assert_eq!(cache.get(&key(2)), Some(record(2)));
        cache.insert(key(3), record(3));
        assert_eq!(cache.len(), 3);
    }
}
