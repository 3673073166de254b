// SPDX-License-Identifier: Apache-2.0/MIT
//! Bounded in-memory LRU cache tier.
//!
//! Backed by a hash table keyed by [`CacheKey`] paired with a doubly-linked
//! list ordered by recency, implemented as an arena of indices (a `Vec` of
//! slots) rather than `Rc`/`RefCell` pointers — the classic way to sidestep
//! ownership cycles in an intrusive list without `unsafe`.
//!
//! All mutations — and `stats`, for a consistent read — hold a single
//! exclusive lock.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::cache::{Artifact, Cache, CacheKey, CacheStats};
use crate::error::Result;

const DEFAULT_CAPACITY: usize = 1024;

struct Node {
    key: CacheKey,
    artifact: Artifact,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner {
    slab: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<CacheKey, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    stats: CacheStats,
}

impl Inner {
    fn detach(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.slab[slot].as_ref().expect("detach of live slot");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.slab[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slab[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn attach_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = self.slab[slot].as_mut().expect("attach of live slot");
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.slab[h].as_mut().unwrap().prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn promote(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.detach(slot);
        self.attach_front(slot);
    }

    fn evict_tail(&mut self) {
        let slot = self.tail.expect("evict_tail called on empty list");
        self.detach(slot);
        let node = self.slab[slot].take().expect("evicted slot was live");
        self.index.remove(&node.key);
        self.free.push(slot);
        self.stats.entries -= 1;
        self.stats.bytes -= node.artifact.size();
        self.stats.evictions += 1;
    }
}

/// Bounded-by-entry-count in-memory LRU cache.
pub struct LruCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl LruCache {
    /// Create a cache bounded to `capacity` entries. A non-positive
    /// capacity defaults to `1024`.
    pub fn new(capacity: i64) -> Self {
        let capacity = if capacity < 1 { DEFAULT_CAPACITY } else { capacity as usize };
        LruCache {
            capacity,
            inner: Mutex::new(Inner {
                slab: Vec::new(),
                free: Vec::new(),
                index: HashMap::new(),
                head: None,
                tail: None,
                stats: CacheStats::default(),
            }),
        }
    }
}

impl Cache for LruCache {
    fn get(&self, key: &CacheKey) -> Result<Option<Artifact>> {
        let mut inner = self.inner.lock().unwrap();
        match inner.index.get(key).copied() {
            Some(slot) => {
                inner.promote(slot);
                inner.stats.hits += 1;
                Ok(Some(inner.slab[slot].as_ref().unwrap().artifact.clone()))
            }
            None => {
                inner.stats.misses += 1;
                Ok(None)
            }
        }
    }

    fn put(&self, key: &CacheKey, artifact: Artifact) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let new_size = artifact.size();

        if let Some(&slot) = inner.index.get(key) {
            let old_size = inner.slab[slot].as_ref().unwrap().artifact.size();
            inner.slab[slot].as_mut().unwrap().artifact = artifact;
            inner.promote(slot);
            if new_size >= old_size {
                inner.stats.bytes += new_size - old_size;
            } else {
                inner.stats.bytes -= old_size - new_size;
            }
            return Ok(());
        }

        let slot = match inner.free.pop() {
            Some(slot) => slot,
            None => {
                inner.slab.push(None);
                inner.slab.len() - 1
            }
        };
        inner.slab[slot] =
            Some(Node { key: key.clone(), artifact, prev: None, next: None });
        inner.index.insert(key.clone(), slot);
        inner.attach_front(slot);
        inner.stats.entries += 1;
        inner.stats.bytes += new_size;

        while inner.stats.entries as usize > self.capacity {
            inner.evict_tail();
        }

        Ok(())
    }

    fn exists(&self, key: &CacheKey) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.index.contains_key(key))
    }

    fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.index.remove(key) {
            inner.detach(slot);
            let node = inner.slab[slot].take().expect("invalidated slot was live");
            inner.free.push(slot);
            inner.stats.entries -= 1;
            inner.stats.bytes -= node.artifact.size();
        }
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(data: &[(&str, &str)]) -> Artifact {
        let mut a = Artifact::new();
        for (name, content) in data {
            a.files.insert((*name).to_owned(), content.as_bytes().to_vec());
        }
        a
    }

    // ── 1. put + get round-trip ──────────────────────────────────────

    #[test]
    fn put_get_round_trip() {
        let cache = LruCache::new(4);
        let k = CacheKey::new("k1").unwrap();
        cache.put(&k, artifact(&[("a", "one")])).unwrap();
        let got = cache.get(&k).unwrap().unwrap();
        assert_eq!(got.files["a"], b"one");
    }

    // ── 2. eviction scenario from spec §8.4 ──────────────────────────

    #[test]
    fn lru_eviction_spares_recently_hit_entry() {
        let cache = LruCache::new(2);
        let k1 = CacheKey::new("k1").unwrap();
        let k2 = CacheKey::new("k2").unwrap();
        let k3 = CacheKey::new("k3").unwrap();

        cache.put(&k1, artifact(&[("a", "one")])).unwrap();
        cache.put(&k2, artifact(&[("b", "two")])).unwrap();
        assert!(cache.get(&k1).unwrap().is_some()); // promote k1 over k2
        cache.put(&k3, artifact(&[("c", "three")])).unwrap();

        assert!(cache.get(&k2).unwrap().is_none(), "k2 should have been evicted");
        assert!(cache.get(&k1).unwrap().is_some());
        assert!(cache.get(&k3).unwrap().is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    // ── 3. capacity normalization ─────────────────────────────────────

    #[test]
    fn non_positive_capacity_defaults() {
        let cache = LruCache::new(0);
        assert_eq!(cache.capacity, DEFAULT_CAPACITY);
    }

    // ── 4. invalidate is idempotent ────────────────────────────────────

    #[test]
    fn invalidate_is_idempotent() {
        let cache = LruCache::new(4);
        let k = CacheKey::new("k1").unwrap();
        cache.put(&k, artifact(&[("a", "one")])).unwrap();
        cache.invalidate(&k).unwrap();
        cache.invalidate(&k).unwrap();
        assert!(!cache.exists(&k).unwrap());
        assert_eq!(cache.stats().entries, 0);
    }

    // ── 5. put on existing key updates bytes by delta, not double-counts ──

    #[test]
    fn put_existing_key_updates_bytes_delta() {
        let cache = LruCache::new(4);
        let k = CacheKey::new("k1").unwrap();
        cache.put(&k, artifact(&[("a", "one")])).unwrap(); // 3 bytes
        assert_eq!(cache.stats().bytes, 3);
        cache.put(&k, artifact(&[("a", "longer-value")])).unwrap(); // 12 bytes
        assert_eq!(cache.stats().bytes, 12);
        assert_eq!(cache.stats().entries, 1);
    }

    // ── 6. hits and misses are counted ──────────────────────────────────

    #[test]
    fn hits_and_misses_counted() {
        let cache = LruCache::new(4);
        let k = CacheKey::new("k1").unwrap();
        assert!(cache.get(&k).unwrap().is_none());
        cache.put(&k, artifact(&[("a", "one")])).unwrap();
        cache.get(&k).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }
}
