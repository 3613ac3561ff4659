// SPDX-License-Identifier: MIT OR Apache-2.0
//! The process-wide LRU cache set shared by all processors.
//!
//! Every cache is a hint: DB writes always use conflict-tolerant statements,
//! so losing a cache entry costs at most a duplicate write attempt, never
//! wrong data. One [`Caches`] value is built at startup and passed by
//! reference to each processor; access is internally synchronized.

use gold_core::{CommitId, GroupingId, OptionsId, TileId, TraceId};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Capacity of each cache, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct CacheSizes {
    /// Resolved commits: lookup key to (commit id, tile).
    pub commits: usize,
    /// Expectation rows already written.
    pub expectations: usize,
    /// Options and grouping rows already written (one shared set).
    pub options_groupings: usize,
    /// Primary-branch params already written.
    pub params: usize,
    /// Trace rows already written.
    pub traces: usize,
}

impl Default for CacheSizes {
    fn default() -> Self {
        Self {
            commits: 10_000,
            expectations: 1_000_000,
            options_groupings: 100_000,
            params: 1_000_000,
            traces: 1_000_000,
        }
    }
}

/// A snapshot of current cache occupancy, exported as gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries in the commits cache.
    pub commits: usize,
    /// Entries in the expectations cache.
    pub expectations: usize,
    /// Entries in the options/groupings cache.
    pub options_groupings: usize,
    /// Entries in the params cache.
    pub params: usize,
    /// Entries in the traces cache.
    pub traces: usize,
}

fn new_cache<K: std::hash::Hash + Eq, V>(size: usize) -> Mutex<LruCache<K, V>> {
    let cap = NonZeroUsize::new(size.max(1)).expect("max(1) is non-zero");
    Mutex::new(LruCache::new(cap))
}

fn expectation_key(grouping_id: &GroupingId, digest_bytes: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(grouping_id.as_bytes());
    key.extend_from_slice(digest_bytes);
    key
}

/// The five LRU caches keyed by content-addressed byte strings.
pub struct Caches {
    commits: Mutex<LruCache<String, (CommitId, TileId)>>,
    expectations: Mutex<LruCache<Vec<u8>, ()>>,
    options_groupings: Mutex<LruCache<Vec<u8>, ()>>,
    params: Mutex<LruCache<(i64, String, String), ()>>,
    traces: Mutex<LruCache<TraceId, ()>>,
}

impl Caches {
    /// Build the cache set with the given capacities.
    #[must_use]
    pub fn new(sizes: CacheSizes) -> Self {
        Self {
            commits: new_cache(sizes.commits),
            expectations: new_cache(sizes.expectations),
            options_groupings: new_cache(sizes.options_groupings),
            params: new_cache(sizes.params),
            traces: new_cache(sizes.traces),
        }
    }

    /// Look up a previously resolved commit by its cache key (the git hash
    /// or the uploaded commit id).
    #[must_use]
    pub fn get_commit(&self, key: &str) -> Option<(CommitId, TileId)> {
        self.commits.lock().expect("cache lock").get(key).cloned()
    }

    /// Record a resolved commit.
    pub fn put_commit(&self, key: String, resolved: (CommitId, TileId)) {
        self.commits.lock().expect("cache lock").put(key, resolved);
    }

    /// Whether an expectation row is known to be written already.
    #[must_use]
    pub fn has_expectation(&self, grouping_id: &GroupingId, digest_bytes: &[u8]) -> bool {
        let key = expectation_key(grouping_id, digest_bytes);
        self.expectations.lock().expect("cache lock").get(&key).is_some()
    }

    /// Mark an expectation row as written. Only call after the write
    /// succeeded; a marked row is skipped on the next pass.
    pub fn mark_expectation(&self, grouping_id: &GroupingId, digest_bytes: &[u8]) {
        let key = expectation_key(grouping_id, digest_bytes);
        self.expectations.lock().expect("cache lock").put(key, ());
    }

    /// Whether an options row is known to be written already.
    #[must_use]
    pub fn has_options(&self, id: &OptionsId) -> bool {
        self.options_groupings
            .lock()
            .expect("cache lock")
            .get(id.as_bytes())
            .is_some()
    }

    /// Mark an options row as written. Only call after the write succeeded.
    pub fn mark_options(&self, id: &OptionsId) {
        self.options_groupings
            .lock()
            .expect("cache lock")
            .put(id.as_bytes().to_vec(), ());
    }

    /// Whether a grouping row is known to be written already.
    #[must_use]
    pub fn has_grouping(&self, id: &GroupingId) -> bool {
        self.options_groupings
            .lock()
            .expect("cache lock")
            .get(id.as_bytes())
            .is_some()
    }

    /// Mark a grouping row as written. Only call after the write succeeded.
    pub fn mark_grouping(&self, id: &GroupingId) {
        self.options_groupings
            .lock()
            .expect("cache lock")
            .put(id.as_bytes().to_vec(), ());
    }

    /// Whether a params tuple is known to be written already.
    #[must_use]
    pub fn has_param(&self, tile: TileId, key: &str, value: &str) -> bool {
        self.params
            .lock()
            .expect("cache lock")
            .get(&(tile.0, key.to_string(), value.to_string()))
            .is_some()
    }

    /// Mark a params tuple as written. Only call after the write succeeded.
    pub fn mark_param(&self, tile: TileId, key: &str, value: &str) {
        self.params
            .lock()
            .expect("cache lock")
            .put((tile.0, key.to_string(), value.to_string()), ());
    }

    /// Whether a trace row is known to be written already.
    #[must_use]
    pub fn has_trace(&self, id: &TraceId) -> bool {
        self.traces.lock().expect("cache lock").get(id).is_some()
    }

    /// Mark a trace row as written. Only call after the write succeeded.
    pub fn mark_trace(&self, id: &TraceId) {
        self.traces.lock().expect("cache lock").put(*id, ());
    }

    /// Snapshot current occupancy for gauge export.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            commits: self.commits.lock().expect("cache lock").len(),
            expectations: self.expectations.lock().expect("cache lock").len(),
            options_groupings: self.options_groupings.lock().expect("cache lock").len(),
            params: self.params.lock().expect("cache lock").len(),
            traces: self.traces.lock().expect("cache lock").len(),
        }
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::new(CacheSizes::default())
    }
}
