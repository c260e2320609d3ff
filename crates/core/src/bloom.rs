//! Negative-result cache for lexical search.
//!
//! A split-hash bloom filter answers "was `(identifier, scope)` ever
//! confirmed empty?" in O(1). Because bloom membership alone admits false
//! positives, the filter is paired with an exact set of confirmed-miss keys:
//! a query only short-circuits when the bloom *and* the exact set agree, so
//! a pair that was never searched end-to-end can never be answered empty.
//! Entries are dropped (and the filter rebuilt) when a file change touches
//! their scope.

use dashmap::DashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

const DEFAULT_BITS: usize = 1 << 16;
const NUM_HASHES: u64 = 4;

// ---------------------------------------------------------------------------
// Bit array with double hashing
// ---------------------------------------------------------------------------

struct BitArray {
    words: Vec<AtomicU64>,
    bits: usize,
}

impl BitArray {
    fn new(bits: usize) -> Self {
        let words = (bits + 63) / 64;
        Self { words: (0..words).map(|_| AtomicU64::new(0)).collect(), bits }
    }

    fn set(&self, bit: usize) {
        let bit = bit % self.bits;
        self.words[bit / 64].fetch_or(1u64 << (bit % 64), Ordering::Relaxed);
    }

    fn get(&self, bit: usize) -> bool {
        let bit = bit % self.bits;
        self.words[bit / 64].load(Ordering::Relaxed) & (1u64 << (bit % 64)) != 0
    }

    fn clear(&self) {
        for w in &self.words {
            w.store(0, Ordering::Relaxed);
        }
    }
}

fn hash_pair(key: &str) -> (u64, u64) {
    let mut h1 = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut h1);
    let a = h1.finish();
    // Second hash derived by re-hashing with a fixed salt
    let mut h2 = std::collections::hash_map::DefaultHasher::new();
    (key, 0x9e3779b97f4a7c15u64).hash(&mut h2);
    let b = h2.finish() | 1; // odd, so successive probes differ
    (a, b)
}

// ---------------------------------------------------------------------------
// Negative cache
// ---------------------------------------------------------------------------

/// Records `(identifier, scope)` pairs confirmed to have zero matches.
pub struct NegativeCache {
    bloom: BitArray,
    /// Exact set of confirmed-empty keys. A bloom hit must be corroborated
    /// here before a search may short-circuit.
    confirmed: DashSet<(String, String)>,
    /// Guards filter rebuilds; reads are lock-free.
    rebuild: RwLock<()>,
}

impl Default for NegativeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NegativeCache {
    pub fn new() -> Self {
        Self {
            bloom: BitArray::new(DEFAULT_BITS),
            confirmed: DashSet::new(),
            rebuild: RwLock::new(()),
        }
    }

    fn key(identifier: &str, scope: &str) -> String {
        format!("{identifier}\u{1}{scope}")
    }

    /// Record a confirmed-empty search result.
    pub fn insert(&self, identifier: &str, scope: &str) {
        let _guard = self.rebuild.read().unwrap_or_else(|e| e.into_inner());
        self.confirmed.insert((identifier.to_string(), scope.to_string()));
        let (a, b) = hash_pair(&Self::key(identifier, scope));
        for i in 0..NUM_HASHES {
            self.bloom.set((a.wrapping_add(i.wrapping_mul(b))) as usize);
        }
    }

    /// True only when this exact pair was previously searched and empty.
    pub fn contains(&self, identifier: &str, scope: &str) -> bool {
        let (a, b) = hash_pair(&Self::key(identifier, scope));
        for i in 0..NUM_HASHES {
            if !self.bloom.get((a.wrapping_add(i.wrapping_mul(b))) as usize) {
                return false;
            }
        }
        // Bloom says maybe; the exact set decides.
        self.confirmed.contains(&(identifier.to_string(), scope.to_string()))
    }

    /// Drop every entry whose scope could contain `path` (including the
    /// workspace-wide empty scope), then rebuild the filter from survivors.
    pub fn invalidate_path(&self, path: &str) {
        let _guard = self.rebuild.write().unwrap_or_else(|e| e.into_inner());
        let stale: Vec<(String, String)> = self
            .confirmed
            .iter()
            .filter(|entry| {
                let scope = &entry.key().1;
                scope.is_empty() || path.starts_with(scope.as_str()) || scope == path
            })
            .map(|entry| entry.key().clone())
            .collect();
        if stale.is_empty() {
            return;
        }
        for key in &stale {
            self.confirmed.remove(key);
        }
        self.bloom.clear();
        for entry in self.confirmed.iter() {
            let (a, b) = hash_pair(&Self::key(&entry.0, &entry.1));
            for i in 0..NUM_HASHES {
                self.bloom.set((a.wrapping_add(i.wrapping_mul(b))) as usize);
            }
        }
    }

    pub fn clear(&self) {
        let _guard = self.rebuild.write().unwrap_or_else(|e| e.into_inner());
        self.confirmed.clear();
        self.bloom.clear();
    }

    pub fn len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_pair_never_hits() {
        let cache = NegativeCache::new();
        assert!(!cache.contains("AsyncEnhancedGrep", "src"));
    }

    #[test]
    fn inserted_pair_hits() {
        let cache = NegativeCache::new();
        cache.insert("ZqXmNvBc", "src");
        assert!(cache.contains("ZqXmNvBc", "src"));
        // Different scope is a different pair
        assert!(!cache.contains("ZqXmNvBc", "lib"));
    }

    #[test]
    fn invalidation_drops_covering_scopes() {
        let cache = NegativeCache::new();
        cache.insert("foo", "src");
        cache.insert("bar", "lib");
        cache.insert("baz", "");
        cache.invalidate_path("src/main.ts");
        assert!(!cache.contains("foo", "src"), "scope 'src' covers the changed file");
        assert!(!cache.contains("baz", ""), "workspace scope covers everything");
        assert!(cache.contains("bar", "lib"), "unrelated scope survives");
    }

    #[test]
    fn false_positive_cannot_short_circuit() {
        let cache = NegativeCache::new();
        // Saturate the filter so bloom membership is likely for anything
        for i in 0..5000 {
            cache.insert(&format!("sym{i}"), "src");
        }
        // A pair never inserted must still be rejected by the exact set
        assert!(!cache.contains("NeverSearched", "src"));
    }

    #[test]
    fn clear_empties_everything() {
        let cache = NegativeCache::new();
        cache.insert("a", "b");
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.contains("a", "b"));
    }
}
