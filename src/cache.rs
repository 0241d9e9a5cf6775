//! Per-worker LRU file cache
//!
//! Maps absolute file paths to in-memory copies of small files. Entries live
//! in a `Slab` arena with intrusive prev/next links forming the recency
//! list (head = most recently used); a `HashMap` indexes paths to arena
//! keys. One `RwLock` guards the whole structure; lookups take the write
//! lock because a hit promotes the entry to the head of the list.
//!
//! Buffers are handed out as `Arc<[u8]>` clones: a hit stays readable for
//! the rest of its request even if the entry is evicted concurrently.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use slab::Slab;

/// Largest file the cache will hold. Files of exactly this size are
/// cacheable; one byte more is not.
pub const MAX_ENTRY_BYTES: usize = 1024 * 1024;

/// Longest path usable as a cache key. Longer paths are served from disk
/// every time.
pub const MAX_KEY_BYTES: usize = 512;

#[derive(Debug)]
struct Entry {
    path: String,
    data: Arc<[u8]>,
    last_access: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct Inner {
    entries: Slab<Entry>,
    index: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    total_bytes: usize,
}

/// Entry count and byte total, reported at shutdown and by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of resident entries.
    pub entries: usize,
    /// Sum of resident buffer sizes.
    pub total_bytes: usize,
}

impl Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} entries, {} bytes", self.entries, self.total_bytes)
    }
}

/// A size-bounded, least-recently-used file cache.
#[derive(Debug)]
pub struct FileCache {
    inner: RwLock<Inner>,
    max_bytes: usize,
}

impl FileCache {
    /// Creates a cache bounded to `max_bytes`. A bound of zero disables the
    /// cache: every lookup misses and every insert is rejected.
    pub fn new(max_bytes: usize) -> Self {
        FileCache {
            inner: RwLock::new(Inner {
                entries: Slab::new(),
                index: HashMap::new(),
                head: None,
                tail: None,
                total_bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Configured byte bound.
    #[inline]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Looks up `path`, promoting the entry to most-recently-used on a hit.
    pub fn get(&self, path: &str) -> Option<Arc<[u8]>> {
        let mut inner = self.inner.write().expect("cache lock poisoned");
        let key = *inner.index.get(path)?;

        inner.unlink(key);
        inner.link_front(key);
        let entry = &mut inner.entries[key];
        entry.last_access = Instant::now();

        Some(Arc::clone(&entry.data))
    }

    /// Inserts or replaces `path`, evicting least-recently-used entries
    /// until the new buffer fits. Returns `false` when the buffer or key is
    /// uncacheable (too large, or the cache is disabled).
    pub fn put(&self, path: &str, data: &[u8]) -> bool {
        if self.max_bytes == 0
            || data.len() > MAX_ENTRY_BYTES
            || data.len() > self.max_bytes
            || path.len() > MAX_KEY_BYTES
        {
            return false;
        }

        let mut inner = self.inner.write().expect("cache lock poisoned");

        if let Some(&key) = inner.index.get(path) {
            let old_len = inner.entries[key].data.len();
            inner.total_bytes = inner.total_bytes - old_len + data.len();

            let entry = &mut inner.entries[key];
            entry.data = Arc::from(data);
            entry.last_access = Instant::now();

            inner.unlink(key);
            inner.link_front(key);

            // A grown replacement can push the total over the bound; the
            // replaced entry sits at the head, so evicting from the tail
            // cannot touch it.
            while inner.total_bytes > self.max_bytes {
                inner.evict_tail();
            }
            return true;
        }

        while inner.total_bytes + data.len() > self.max_bytes {
            inner.evict_tail();
        }

        let key = inner.entries.insert(Entry {
            path: path.to_owned(),
            data: Arc::from(data),
            last_access: Instant::now(),
            prev: None,
            next: None,
        });
        inner.index.insert(path.to_owned(), key);
        inner.link_front(key);
        inner.total_bytes += data.len();

        true
    }

    /// Current entry count and byte total.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read().expect("cache lock poisoned");
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
        }
    }
}

impl Inner {
    fn unlink(&mut self, key: usize) {
        let (prev, next) = {
            let entry = &self.entries[key];
            (entry.prev, entry.next)
        };

        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.tail = prev,
        }

        let entry = &mut self.entries[key];
        entry.prev = None;
        entry.next = None;
    }

    fn link_front(&mut self, key: usize) {
        let old_head = self.head;
        {
            let entry = &mut self.entries[key];
            entry.prev = None;
            entry.next = old_head;
        }
        if let Some(h) = old_head {
            self.entries[h].prev = Some(key);
        }
        self.head = Some(key);
        if self.tail.is_none() {
            self.tail = Some(key);
        }
    }

    fn evict_tail(&mut self) {
        let key = self.tail.expect("eviction requires a resident tail entry");
        self.unlink(key);
        let entry = self.entries.remove(key);
        self.index.remove(&entry.path);
        self.total_bytes -= entry.data.len();
    }
}

#[cfg(test)]
mod test {
    use super::{FileCache, MAX_ENTRY_BYTES, MAX_KEY_BYTES};

    #[test]
    fn get_returns_put_bytes_identically() {
        let cache = FileCache::new(1024);
        assert!(cache.put("/srv/a.html", b"hello"));
        let hit = cache.get("/srv/a.html").expect("resident entry");
        assert_eq!(b"hello", &hit[..]);
    }

    #[test]
    fn miss_on_absent_path() {
        let cache = FileCache::new(1024);
        assert!(cache.get("/srv/missing").is_none());
    }

    #[test]
    fn second_put_replaces_and_total_matches_second_size() {
        let cache = FileCache::new(1024);
        cache.put("/srv/a", b"first");
        cache.put("/srv/a", b"the second body");
        let stats = cache.stats();
        assert_eq!(1, stats.entries);
        assert_eq!(b"the second body".len(), stats.total_bytes);
        assert_eq!(
            b"the second body",
            &cache.get("/srv/a").expect("resident")[..]
        );
    }

    #[test]
    fn eviction_keeps_total_within_bound() {
        let cache = FileCache::new(10);
        cache.put("/a", b"aaaa");
        cache.put("/b", b"bbbb");
        cache.put("/c", b"cccc");
        let stats = cache.stats();
        assert!(stats.total_bytes <= 10);
        assert_eq!(2, stats.entries);
    }

    #[test]
    fn least_recently_used_entry_is_evicted_first() {
        let cache = FileCache::new(12);
        cache.put("/a", b"aaaa");
        cache.put("/b", b"bbbb");
        cache.put("/c", b"cccc");

        // Touch /a so /b becomes the LRU, then force one eviction.
        cache.get("/a").expect("resident");
        cache.put("/d", b"dddd");

        assert!(cache.get("/b").is_none());
        assert!(cache.get("/a").is_some());
        assert!(cache.get("/c").is_some());
        assert!(cache.get("/d").is_some());
    }

    #[test]
    fn replacement_eviction_spares_the_replaced_entry() {
        let cache = FileCache::new(10);
        cache.put("/a", b"aaa");
        cache.put("/b", b"bbb");
        // Growing /a to 8 bytes exceeds the bound; /b must go, /a must stay.
        cache.put("/a", b"aaaaaaaa");
        let stats = cache.stats();
        assert!(stats.total_bytes <= 10);
        assert!(cache.get("/b").is_none());
        assert_eq!(b"aaaaaaaa", &cache.get("/a").expect("resident")[..]);
    }

    #[test]
    fn exactly_one_mebibyte_is_cacheable() {
        let cache = FileCache::new(2 * MAX_ENTRY_BYTES);
        let body = vec![0u8; MAX_ENTRY_BYTES];
        assert!(cache.put("/big", &body));
        assert!(cache.get("/big").is_some());
    }

    #[test]
    fn one_byte_over_the_entry_bound_is_rejected() {
        let cache = FileCache::new(4 * MAX_ENTRY_BYTES);
        let body = vec![0u8; MAX_ENTRY_BYTES + 1];
        assert!(!cache.put("/big", &body));
        assert!(cache.get("/big").is_none());
    }

    #[test]
    fn zero_capacity_cache_always_misses() {
        let cache = FileCache::new(0);
        assert!(!cache.put("/a", b""));
        assert!(!cache.put("/b", b"data"));
        assert!(cache.get("/a").is_none());
        assert_eq!(0, cache.stats().entries);
    }

    #[test]
    fn oversized_key_is_not_cached() {
        let cache = FileCache::new(1024);
        let long_path = format!("/{}", "x".repeat(MAX_KEY_BYTES));
        assert!(!cache.put(&long_path, b"data"));
        assert!(cache.get(&long_path).is_none());
    }

    #[test]
    fn hit_outlives_eviction_of_its_entry() {
        let cache = FileCache::new(8);
        cache.put("/a", b"aaaa");
        let hit = cache.get("/a").expect("resident");
        // Fill the cache so /a is evicted while the hit is still held.
        cache.put("/b", b"bbbbbbbb");
        assert!(cache.get("/a").is_none());
        assert_eq!(b"aaaa", &hit[..]);
    }
}
