//! Error types for tkr-media
//!
//! Attachment-level failures (`AttachmentError`) are values that travel
//! through the cache and the audio timeline as per-entry / per-segment status.
//! Only `Error` crosses the public API boundary.

use thiserror::Error;
use tkr_common::ContentHash;

/// Failure to produce an attachment payload
///
/// `Clone` so a single in-flight load can hand the same outcome to every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachmentError {
    /// No attachment stored under this hash
    #[error("Attachment not found: {0}")]
    NotFound(ContentHash),

    /// Attachment exists but its payload is unusable
    #[error("Attachment {hash} could not be decoded: {reason}")]
    Decode { hash: ContentHash, reason: String },

    /// Backing store failed while reading
    #[error("Attachment store failed for {hash}: {reason}")]
    Store { hash: ContentHash, reason: String },
}

impl AttachmentError {
    pub fn hash(&self) -> &ContentHash {
        match self {
            AttachmentError::NotFound(hash)
            | AttachmentError::Decode { hash, .. }
            | AttachmentError::Store { hash, .. } => hash,
        }
    }
}

/// One audio segment that could not be loaded
///
/// Recorded on the segment; never aborts the timeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Segment {segment_index} ({segment_id}) failed to load: {cause}")]
pub struct SegmentLoadError {
    pub segment_index: usize,
    pub segment_id: String,
    pub cause: AttachmentError,
}

/// Main error type for tkr-media
#[derive(Error, Debug)]
pub enum Error {
    /// Shared-crate failure (record validation, config file, JSON)
    #[error(transparent)]
    Common(#[from] tkr_common::Error),

    /// Configuration value rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// Attachment could not be read through the cache
    #[error("Attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    /// Media file is corrupt or in a format no backend can play
    #[error("Media unsupported or corrupt: {0}")]
    MediaUnsupportedOrCorrupt(String),

    /// Session has nothing to play (screenshot-only)
    #[error("Session has no playable media")]
    NoPlayableMedia,

    /// Operation not valid in the engine's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Convenience Result type using tkr-media Error
pub type Result<T> = std::result::Result<T, Error>;
