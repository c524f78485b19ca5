//! Byte-budget LRU cache of decoded sections, shared by every open store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

/// Decoded elements of one section.
pub type DecodedSection = Arc<Vec<Vec<u8>>>;

/// Decoded (key, value) pairs of one long-buffer section.
pub type DecodedPairs = Arc<Vec<(u64, u64)>>;

type Key = (u64, u32);

enum Cached {
    Values(DecodedSection),
    Pairs(DecodedPairs),
}

impl Cached {
    fn weight(&self) -> usize {
        match self {
            Cached::Values(v) => weight(v),
            Cached::Pairs(p) => p.len() * std::mem::size_of::<(u64, u64)>(),
        }
    }
}

struct Inner {
    map: LruCache<Key, Cached>,
    used: usize,
}

/// Least-recently-used cache bounded by the decoded size of its sections.
///
/// Eviction only drops the cache's reference; a reader still holding a
/// section keeps it alive until it is done.
pub struct SectionCache {
    inner: Mutex<Inner>,
    budget: usize,
    next_store: AtomicU64,
}

impl std::fmt::Debug for SectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SectionCache")
            .field("budget", &self.budget)
            .field("used", &inner.used)
            .field("entries", &inner.map.len())
            .finish()
    }
}

pub(crate) fn weight(section: &[Vec<u8>]) -> usize {
    section
        .iter()
        .map(|e| e.len() + std::mem::size_of::<Vec<u8>>())
        .sum()
}

impl SectionCache {
    pub fn new(budget: u64) -> Arc<Self> {
        Arc::new(SectionCache {
            inner: Mutex::new(Inner {
                map: LruCache::unbounded(),
                used: 0,
            }),
            budget: usize::try_from(budget).unwrap_or(usize::MAX),
            next_store: AtomicU64::new(0),
        })
    }

    /// Identifier that keeps one store's sections apart from another's.
    pub(crate) fn register_store(&self) -> u64 {
        self.next_store.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn get(&self, store: u64, section: u32) -> Option<DecodedSection> {
        match self.inner.lock().map.get(&(store, section)) {
            Some(Cached::Values(v)) => Some(Arc::clone(v)),
            _ => None,
        }
    }

    pub(crate) fn get_pairs(&self, store: u64, section: u32) -> Option<DecodedPairs> {
        match self.inner.lock().map.get(&(store, section)) {
            Some(Cached::Pairs(p)) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    pub(crate) fn insert(&self, store: u64, section: u32, value: DecodedSection) {
        self.put((store, section), Cached::Values(value));
    }

    pub(crate) fn insert_pairs(&self, store: u64, section: u32, value: DecodedPairs) {
        self.put((store, section), Cached::Pairs(value));
    }

    fn put(&self, key: Key, value: Cached) {
        let w = value.weight();
        if w > self.budget {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(old) = inner.map.put(key, value) {
            inner.used -= old.weight();
        }
        inner.used += w;
        while inner.used > self.budget {
            match inner.map.pop_lru() {
                Some((_, old)) => inner.used -= old.weight(),
                None => break,
            }
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.inner.lock().used
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
