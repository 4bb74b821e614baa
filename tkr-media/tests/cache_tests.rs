//! Attachment cache bounds, eviction order and load de-duplication

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tkr_common::ContentHash;
use tkr_media::config::CacheConfig;
use tkr_media::store::{Attachment, MemoryAttachmentStore};
use tkr_media::{AttachmentCache, AttachmentError};

fn cache(store: &Arc<MemoryAttachmentStore>, max_entries: usize, max_size_bytes: u64) -> AttachmentCache {
    AttachmentCache::new(
        store.clone(),
        &CacheConfig {
            max_entries,
            max_size_bytes,
        },
    )
}

/// Unique payload of exactly `size` bytes (at least 8)
fn payload(id: u64, size: usize) -> Vec<u8> {
    let mut bytes = id.to_le_bytes().to_vec();
    bytes.resize(size.max(8), 0xAB);
    bytes
}

#[derive(Debug, Clone)]
enum Op {
    Get(usize),
    Put(u64, usize),
    Clear,
}

fn op_strategy(pool: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..pool).prop_map(Op::Get),
        3 => (1000u64..2000, 8usize..400).prop_map(|(id, size)| Op::Put(id, size)),
        1 => Just(Op::Clear),
    ]
}

proptest! {
    #[test]
    fn prop_bounds_hold_after_every_operation(
        sizes in prop::collection::vec(8usize..400, 1..20),
        max_entries in 1usize..8,
        max_size in 50u64..1200,
        ops in prop::collection::vec(op_strategy(20), 1..80),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let store = Arc::new(MemoryAttachmentStore::new());
        let hashes: Vec<ContentHash> = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| store.insert(payload(i as u64, *size), "audio/webm"))
            .collect();
        let cache = cache(&store, max_entries, max_size);

        for op in ops {
            match op {
                Op::Get(i) => {
                    let hash = &hashes[i % hashes.len()];
                    let loaded = runtime.block_on(cache.get(hash)).unwrap();
                    prop_assert_eq!(&loaded.hash, hash);
                }
                Op::Put(id, size) => {
                    cache.put(Attachment::new(payload(id, size), "image/png"));
                }
                Op::Clear => cache.clear(),
            }

            let stats = cache.stats();
            prop_assert!(stats.entry_count <= max_entries);
            prop_assert!(stats.current_size <= max_size);
            prop_assert_eq!(cache.cached_hashes().len(), stats.entry_count);
        }
    }
}

#[tokio::test]
async fn test_least_recently_used_evicted_first() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let [a, b, c, d, e] = [1u64, 2, 3, 4, 5].map(|id| store.insert(payload(id, 10), "audio/webm"));
    let cache = cache(&store, 3, 1024);

    for hash in [&a, &b, &c] {
        cache.get(hash).await.unwrap();
    }
    cache.get(&d).await.unwrap();
    assert!(!cache.contains(&a));
    assert!(cache.contains(&b));

    cache.get(&e).await.unwrap();
    assert!(!cache.contains(&b));
    assert!(cache.contains(&c));
    assert_eq!(cache.cached_hashes(), vec![e, d, c]);
}

#[tokio::test]
async fn test_hit_refreshes_recency() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let [a, b, c, d] = [1u64, 2, 3, 4].map(|id| store.insert(payload(id, 10), "audio/webm"));
    let cache = cache(&store, 3, 1024);

    for hash in [&a, &b, &c] {
        cache.get(hash).await.unwrap();
    }
    // A becomes most recent, so B is now the eviction candidate
    cache.get(&a).await.unwrap();
    cache.get(&d).await.unwrap();

    assert!(cache.contains(&a));
    assert!(!cache.contains(&b));
    assert_eq!(store.load_count(), 4);
}

#[tokio::test]
async fn test_sixty_inserts_keep_fifty_most_recent() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let cache = cache(&store, 50, 1024 * 1024);

    let hashes: Vec<ContentHash> = (0..60u64)
        .map(|id| {
            let attachment = Attachment::new(payload(id, 8), "image/png");
            let hash = attachment.hash.clone();
            assert!(cache.put(attachment));
            hash
        })
        .collect();

    let stats = cache.stats();
    assert_eq!(stats.entry_count, 50);
    for hash in &hashes[..10] {
        assert!(!cache.contains(hash));
    }
    for hash in &hashes[10..] {
        assert!(cache.contains(hash));
    }
    assert_eq!(store.load_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_readers_share_one_load() {
    let store = Arc::new(MemoryAttachmentStore::with_latency(Duration::from_millis(200)));
    let hash = store.insert(payload(7, 64), "audio/webm");
    let cache = Arc::new(cache(&store, 10, 4096));

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let hash = hash.clone();
            tokio::spawn(async move { cache.get(&hash).await })
        })
        .collect();
    for reader in readers {
        let attachment = reader.await.unwrap().unwrap();
        assert_eq!(attachment.size(), 64);
    }

    assert_eq!(store.load_count(), 1);
    let stats = cache.stats();
    assert_eq!(stats.loads_issued, 1);
    assert_eq!(stats.entry_count, 1);
    assert_eq!(stats.hits + stats.misses, 8);
}

#[tokio::test]
async fn test_missing_and_corrupt_are_reported_not_cached() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let corrupt = store.insert(payload(9, 32), "audio/webm");
    store.corrupt(&corrupt);
    let cache = cache(&store, 10, 4096);

    let missing = ContentHash::new("does-not-exist");
    assert!(matches!(
        cache.get(&missing).await,
        Err(AttachmentError::NotFound(_))
    ));
    assert!(matches!(
        cache.get(&corrupt).await,
        Err(AttachmentError::Decode { .. })
    ));
    assert!(cache.get(&corrupt).await.is_err());

    assert_eq!(cache.stats().entry_count, 0);
    // Every failed lookup went back to the store
    assert_eq!(store.load_count(), 3);
}

#[tokio::test]
async fn test_cleared_cache_reloads_identically() {
    let store = Arc::new(MemoryAttachmentStore::new());
    let hash = store.insert(payload(11, 48), "audio/webm");
    let cache = cache(&store, 10, 4096);

    let first = cache.get(&hash).await.unwrap();
    cache.clear();
    assert_eq!(cache.stats().entry_count, 0);

    let second = cache.get(&hash).await.unwrap();
    assert_eq!(first.payload, second.payload);
    assert_eq!(store.load_count(), 2);
}
