//! Attachment store
//!
//! Content-addressed key → payload lookup. The durable store is managed by the
//! capture layer; this crate reads through it (via the cache) and writes to it
//! only when importing attachments.

mod fs;
mod memory;

pub use fs::{AttachmentCounts, AttachmentMeta, FsAttachmentStore};
pub use memory::MemoryAttachmentStore;

use crate::error::{AttachmentError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tkr_common::ContentHash;

/// Fallback MIME type when neither metadata nor sniffing identifies a payload
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Immutable binary blob addressed by the hash of its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub hash: ContentHash,
    pub mime_type: String,
    pub payload: Vec<u8>,
}

impl Attachment {
    /// Wrap a payload, computing its content hash
    pub fn new(payload: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            hash: content_hash(&payload),
            mime_type: mime_type.into(),
            payload,
        }
    }

    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }
}

/// SHA-256 content address of a payload (lowercase hex)
pub fn content_hash(payload: &[u8]) -> ContentHash {
    let digest = Sha256::digest(payload);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    ContentHash::new(hex)
}

/// Best-effort MIME detection from magic bytes
pub fn sniff_mime(payload: &[u8]) -> String {
    infer::get(payload)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

/// Durable content-addressed attachment storage
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Read the attachment stored under `hash`
    async fn load(&self, hash: &ContentHash) -> std::result::Result<Attachment, AttachmentError>;

    /// Store a payload and return its content hash
    ///
    /// Saving identical bytes twice is a no-op that returns the same hash.
    async fn save(&self, payload: Vec<u8>, mime_type: &str) -> Result<ContentHash>;
}
