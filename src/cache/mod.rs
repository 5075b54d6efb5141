//! Method-resolution cache.
//!
//! Resolving a member walks the receiver's specializer order and consults the
//! class table at every step. Class descriptors are read-only after setup, so the
//! answer for a (class, member) pair can be cached until a class is re-registered.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// What kind of member is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// Field access (`args: None`)
    Attribute,
    /// Method call
    Method,
}

/// Cache key: receiver class plus member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolutionKey {
    /// Receiver's class name
    pub class: String,
    /// Member name
    pub member: String,
    /// Attribute or method
    pub kind: MemberKind,
}

impl ResolutionKey {
    /// Create a key.
    pub fn new(class: impl Into<String>, member: impl Into<String>, kind: MemberKind) -> Self {
        Self {
            class: class.into(),
            member: member.into(),
            kind,
        }
    }
}

/// Where a member resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Class in the specializer order that defines the member
    pub class: String,
    /// Whether the member found is an attribute getter or a method
    pub kind: MemberKind,
}

/// An LRU cache of member resolutions.
pub struct ResolutionCache {
    entries: Mutex<LruCache<ResolutionKey, Resolution>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolutionCache {
    /// Create a cache holding up to `max_entries` resolutions.
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a cached resolution.
    pub fn get(&self, key: &ResolutionKey) -> Option<Resolution> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(resolution) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(resolution.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache a resolution.
    pub fn put(&self, key: ResolutionKey, resolution: Resolution) {
        self.entries.lock().put(key, resolution);
    }

    /// Clear all cached entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            size: self.entries.lock().len(),
            hit_rate,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Current cache size
    pub size: usize,
    /// Hit rate percentage
    pub hit_rate: f64,
}
