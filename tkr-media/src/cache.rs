//! Attachment cache
//!
//! Bounded read-through cache over an `AttachmentStore`.
//!
//! - Both bounds (`max_entries`, `max_size_bytes`) hold after every mutation.
//! - Strict LRU eviction: a hit, a `put` or a completed load makes the entry
//!   most recently used.
//! - Concurrent misses on the same hash share one in-flight load. The shared
//!   load admits its result exactly once, whoever polls it to completion.
//! - An attachment larger than `max_size_bytes` is returned to its callers but
//!   never stored.
//! - Failed loads are returned to every waiter and never cached; the next
//!   `get` retries the store.
//!
//! The internal lock is a plain `std::sync::Mutex` and is never held across an
//! `.await`.

use crate::config::CacheConfig;
use crate::error::{AttachmentError, Result};
use crate::store::{Attachment, AttachmentStore};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tkr_common::ContentHash;
use tracing::{debug, trace};

type LoadResult = std::result::Result<Arc<Attachment>, AttachmentError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// Point-in-time cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entry_count: usize,
    pub current_size: u64,
    pub max_size: u64,
    pub max_entries: usize,
    pub hits: u64,
    /// Lookups that found no entry, including callers that joined a load
    /// already in flight
    pub misses: u64,
    /// Loads actually issued to the store
    pub loads_issued: u64,
    /// `hits / (hits + misses)`, 0.0 before the first lookup
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    max_entries: usize,
    max_size: u64,
}

struct Inner {
    entries: LruCache<ContentHash, Arc<Attachment>>,
    current_size: u64,
    in_flight: HashMap<ContentHash, (u64, SharedLoad)>,
    /// Bumped by `clear()`; loads started before a clear do not admit
    generation: u64,
    next_load_id: u64,
    hits: u64,
    misses: u64,
    loads_issued: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            current_size: 0,
            in_flight: HashMap::new(),
            generation: 0,
            next_load_id: 0,
            hits: 0,
            misses: 0,
            loads_issued: 0,
        }
    }

    /// Store `attachment` as most recently used, evicting LRU entries until
    /// it fits. Returns false when it can never fit.
    fn admit(&mut self, attachment: Arc<Attachment>, bounds: Bounds) -> bool {
        let size = attachment.size();
        if bounds.max_entries == 0 || size > bounds.max_size {
            debug!(
                "Attachment {} ({} bytes) exceeds cache bounds, serving uncached",
                attachment.hash, size
            );
            return false;
        }

        if let Some(previous) = self.entries.pop(&attachment.hash) {
            self.current_size -= previous.size();
        }

        while self.entries.len() >= bounds.max_entries || self.current_size + size > bounds.max_size {
            match self.entries.pop_lru() {
                Some((evicted, payload)) => {
                    self.current_size -= payload.size();
                    debug!("Evicted {} ({} bytes)", evicted, payload.size());
                }
                None => break,
            }
        }

        self.current_size += size;
        self.entries.put(attachment.hash.clone(), attachment);
        true
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shared, internally synchronized attachment cache
pub struct AttachmentCache {
    store: Arc<dyn AttachmentStore>,
    inner: Arc<Mutex<Inner>>,
    bounds: Bounds,
}

impl AttachmentCache {
    pub fn new(store: Arc<dyn AttachmentStore>, config: &CacheConfig) -> Self {
        debug!(
            "Attachment cache: max {} entries, max {} bytes",
            config.max_entries, config.max_size_bytes
        );
        Self {
            store,
            inner: Arc::new(Mutex::new(Inner::new())),
            bounds: Bounds {
                max_entries: config.max_entries,
                max_size: config.max_size_bytes,
            },
        }
    }

    pub fn store(&self) -> &Arc<dyn AttachmentStore> {
        &self.store
    }

    /// Read through the cache
    ///
    /// Errors are values: not-found and decode failures come back as
    /// `AttachmentError` and leave the cache unchanged.
    pub async fn get(&self, hash: &ContentHash) -> LoadResult {
        let load = {
            let mut inner = lock(&self.inner);

            if let Some(hit) = inner.entries.get(hash).cloned() {
                inner.hits += 1;
                trace!("Cache hit {}", hash);
                return Ok(hit);
            }
            inner.misses += 1;

            match inner.in_flight.get(hash) {
                Some((_, load)) => {
                    trace!("Joining in-flight load of {}", hash);
                    load.clone()
                }
                None => {
                    let load = self.start_load(&mut inner, hash);
                    inner.in_flight.insert(hash.clone(), load.clone());
                    load.1
                }
            }
        };

        load.await
    }

    fn start_load(&self, inner: &mut Inner, hash: &ContentHash) -> (u64, SharedLoad) {
        let load_id = inner.next_load_id;
        inner.next_load_id += 1;
        inner.loads_issued += 1;
        debug!("Cache miss {}, loading from store", hash);

        let store = Arc::clone(&self.store);
        let shared = Arc::clone(&self.inner);
        let generation = inner.generation;
        let bounds = self.bounds;
        let hash = hash.clone();

        let load = async move {
            let result = store.load(&hash).await.map(Arc::new);

            let mut inner = lock(&shared);
            if inner.in_flight.get(&hash).is_some_and(|(id, _)| *id == load_id) {
                inner.in_flight.remove(&hash);
            }
            match &result {
                Ok(attachment) if inner.generation == generation => {
                    inner.admit(Arc::clone(attachment), bounds);
                }
                Ok(_) => trace!("Cache cleared during load of {}, not admitting", hash),
                Err(e) => debug!("Load of {} failed: {}", hash, e),
            }
            result
        }
        .boxed()
        .shared();

        (load_id, load)
    }

    /// Insert an attachment directly (store write and cache population together)
    ///
    /// Returns whether the attachment was retained; oversized payloads are not.
    pub fn put(&self, attachment: Attachment) -> bool {
        lock(&self.inner).admit(Arc::new(attachment), self.bounds)
    }

    /// Write a payload to the store and populate the cache with it
    pub async fn save(&self, payload: Vec<u8>, mime_type: &str) -> Result<ContentHash> {
        let hash = self.store.save(payload.clone(), mime_type).await?;
        self.put(Attachment {
            hash: hash.clone(),
            mime_type: mime_type.to_string(),
            payload,
        });
        Ok(hash)
    }

    /// Present in the cache (does not touch recency)
    pub fn contains(&self, hash: &ContentHash) -> bool {
        lock(&self.inner).entries.peek(hash).is_some()
    }

    /// Cached hashes, most recently used first
    pub fn cached_hashes(&self) -> Vec<ContentHash> {
        lock(&self.inner).entries.iter().map(|(hash, _)| hash.clone()).collect()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = lock(&self.inner);
        let lookups = inner.hits + inner.misses;
        CacheStats {
            entry_count: inner.entries.len(),
            current_size: inner.current_size,
            max_size: self.bounds.max_size,
            max_entries: self.bounds.max_entries,
            hits: inner.hits,
            misses: inner.misses,
            loads_issued: inner.loads_issued,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }

    /// Drop every entry and reset the counters
    ///
    /// Loads already in flight still resolve for the callers awaiting them,
    /// but are neither admitted nor joined by later lookups.
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.in_flight.clear();
        inner.current_size = 0;
        inner.generation += 1;
        inner.hits = 0;
        inner.misses = 0;
        inner.loads_issued = 0;
        debug!("Cache cleared ({} entries dropped)", dropped);
    }
}
