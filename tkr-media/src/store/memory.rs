//! In-memory attachment store
//!
//! Used by tests and the simulated CLI player. Records every `load` so callers
//! can assert on load counts and ordering, and can inject latency or
//! corruption per attachment.

use super::{Attachment, AttachmentStore};
use crate::error::{AttachmentError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tkr_common::ContentHash;

#[derive(Debug, Default)]
struct Inner {
    attachments: HashMap<ContentHash, Attachment>,
    corrupt: HashSet<ContentHash>,
    load_log: Vec<ContentHash>,
}

#[derive(Debug, Default)]
pub struct MemoryAttachmentStore {
    inner: Mutex<Inner>,
    loads: AtomicU64,
    latency: Option<Duration>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every load sleeps for `latency` before answering
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a payload synchronously and return its hash
    pub fn insert(&self, payload: Vec<u8>, mime_type: &str) -> ContentHash {
        let attachment = Attachment::new(payload, mime_type);
        let hash = attachment.hash.clone();
        self.lock().attachments.insert(hash.clone(), attachment);
        hash
    }

    /// Make subsequent loads of `hash` fail with a decode error
    pub fn corrupt(&self, hash: &ContentHash) {
        self.lock().corrupt.insert(hash.clone());
    }

    /// Number of `load` calls that reached the store
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Hashes in the order their loads started
    pub fn load_log(&self) -> Vec<ContentHash> {
        self.lock().load_log.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().attachments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    async fn load(&self, hash: &ContentHash) -> std::result::Result<Attachment, AttachmentError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.lock().load_log.push(hash.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let inner = self.lock();
        if inner.corrupt.contains(hash) {
            return Err(AttachmentError::Decode {
                hash: hash.clone(),
                reason: "corrupt payload".to_string(),
            });
        }
        inner
            .attachments
            .get(hash)
            .cloned()
            .ok_or_else(|| AttachmentError::NotFound(hash.clone()))
    }

    async fn save(&self, payload: Vec<u8>, mime_type: &str) -> Result<ContentHash> {
        Ok(self.insert(payload, mime_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_records_log() {
        let store = MemoryAttachmentStore::new();
        let a = store.insert(b"a".to_vec(), "audio/wav");
        let b = store.insert(b"b".to_vec(), "audio/wav");

        store.load(&b).await.unwrap();
        store.load(&a).await.unwrap();
        assert_eq!(store.load_count(), 2);
        assert_eq!(store.load_log(), vec![b, a]);
    }

    #[tokio::test]
    async fn test_missing_and_corrupt() {
        let store = MemoryAttachmentStore::new();
        let missing = ContentHash::from("nope");
        assert_eq!(
            store.load(&missing).await,
            Err(AttachmentError::NotFound(missing))
        );

        let hash = store.insert(b"x".to_vec(), "audio/wav");
        store.corrupt(&hash);
        assert!(matches!(
            store.load(&hash).await,
            Err(AttachmentError::Decode { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let store = MemoryAttachmentStore::with_latency(Duration::from_millis(500));
        let hash = store.insert(b"slow".to_vec(), "audio/wav");
        let started = tokio::time::Instant::now();
        store.load(&hash).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
