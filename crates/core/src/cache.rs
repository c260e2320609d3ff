//! Shared caches: the fingerprinted query cache and the L1 search cache.
//!
//! Query responses are keyed by a deterministic fingerprint of
//! `(kind, normalized args, workspace root)` and invalidated whenever a file
//! under the query's scope changes. Search results carry a short TTL.

use crate::types::{CoreRequest, CoreResponse};
use dashmap::DashMap;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Deterministic cache key for a request within one workspace.
pub fn fingerprint(request: &CoreRequest, workspace_root: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.kind_label().as_bytes());
    hasher.update([0u8]);
    // Serialized args are already normalized by the closed request type
    if let Ok(args) = serde_json::to_vec(request) {
        hasher.update(&args);
    }
    hasher.update([0u8]);
    hasher.update(workspace_root.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in &digest[..16] {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

// ---------------------------------------------------------------------------
// Query cache
// ---------------------------------------------------------------------------

struct QueryEntry {
    response: CoreResponse,
    /// Path prefix this result depends on; empty = whole workspace.
    scope: String,
    inserted: Instant,
}

/// Bounded, TTL-evicting cache of fused responses.
pub struct QueryCache {
    entries: Mutex<LruCache<String, QueryEntry>>,
    ttl: Duration,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl QueryCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            ttl,
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn probe(&self, key: &str) -> Option<CoreResponse> {
        use std::sync::atomic::Ordering;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let expired = match entries.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let mut response = entry.response.clone();
                response.cache_hit = true;
                return Some(response);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn store(&self, key: String, response: CoreResponse, scope: String) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(key, QueryEntry { response, scope, inserted: Instant::now() });
    }

    /// Drop entries whose scope could contain `path`.
    pub fn invalidate_path(&self, path: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.scope.is_empty() || path.starts_with(e.scope.as_str()))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_rate(&self) -> f64 {
        use std::sync::atomic::Ordering;
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}

// ---------------------------------------------------------------------------
// Search cache (L1)
// ---------------------------------------------------------------------------

/// Default TTL for cached content-search results.
pub const SEARCH_TTL_CONTENT: Duration = Duration::from_secs(5);
/// Longer TTL for glob/ls listings, which change less often.
pub const SEARCH_TTL_LISTING: Duration = Duration::from_secs(30);

struct SearchEntry<T> {
    value: T,
    inserted: Instant,
    ttl: Duration,
}

/// Concurrent keyed cache with per-entry TTL, used for raw L1 results.
pub struct SearchCache<T: Clone> {
    entries: DashMap<String, SearchEntry<T>>,
}

impl<T: Clone> Default for SearchCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SearchCache<T> {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let entry = self.entries.get(key)?;
        if entry.inserted.elapsed() < entry.ttl {
            Some(entry.value.clone())
        } else {
            drop(entry);
            self.entries.remove(key);
            None
        }
    }

    pub fn put(&self, key: String, value: T, ttl: Duration) {
        self.entries.insert(key, SearchEntry { value, inserted: Instant::now(), ttl });
    }

    /// Remove entries whose scope could contain `path`. Keys embed their
    /// scope as the second `\u{1}`-separated component; workspace-wide
    /// entries (empty scope) always go.
    pub fn invalidate_path(&self, path: &str) {
        self.entries.retain(|key, _| {
            let scope = key.split('\u{1}').nth(1).unwrap_or("");
            !scope.is_empty() && !path.starts_with(scope) && !scope.starts_with(path)
        });
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
