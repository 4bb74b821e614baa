//! Filesystem attachment store
//!
//! Layout under the attachments directory:
//! - `<hash>.dat`        raw payload
//! - `<hash>.meta.json`  `AttachmentMeta` (optional; MIME is sniffed without it)

use super::{content_hash, sniff_mime, Attachment, AttachmentStore};
use crate::error::{AttachmentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tkr_common::ContentHash;
use tracing::{debug, info, warn};

/// Sidecar metadata written next to each payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    pub id: String,
    #[serde(rename = "type")]
    pub attachment_type: String,
    #[serde(default)]
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Attachment counts by MIME family (storage analytics)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttachmentCounts {
    pub total: usize,
    pub images: usize,
    pub audio: usize,
    pub video: usize,
    pub other: usize,
}

impl AttachmentCounts {
    fn record(&mut self, mime_type: &str) {
        self.total += 1;
        if mime_type.starts_with("image/") {
            self.images += 1;
        } else if mime_type.starts_with("audio/") {
            self.audio += 1;
        } else if mime_type.starts_with("video/") {
            self.video += 1;
        } else {
            self.other += 1;
        }
    }
}

/// Attachment store backed by a directory of `.dat` files
#[derive(Debug, Clone)]
pub struct FsAttachmentStore {
    dir: PathBuf,
}

impl FsAttachmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn data_path(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join(format!("{}.dat", hash))
    }

    fn meta_path(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join(format!("{}.meta.json", hash))
    }

    /// Hashes are used as file names; anything that is not a plain token
    /// cannot name a stored attachment.
    fn is_valid_key(hash: &ContentHash) -> bool {
        let key = hash.as_str();
        !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    async fn read_meta(&self, hash: &ContentHash) -> Option<AttachmentMeta> {
        let content = tokio::fs::read_to_string(self.meta_path(hash)).await.ok()?;
        match serde_json::from_str::<AttachmentMeta>(&content) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("Failed to parse metadata for {}: {}", hash, e);
                None
            }
        }
    }

    /// Metadata for the given hashes, skipping ones without readable metadata
    pub async fn load_metadata(&self, hashes: &[ContentHash]) -> Vec<AttachmentMeta> {
        let start = Instant::now();
        let reads = hashes.iter().map(|hash| self.read_meta(hash));
        let metadata: Vec<AttachmentMeta> = futures::future::join_all(reads)
            .await
            .into_iter()
            .flatten()
            .collect();

        debug!(
            "Loaded {} of {} metadata files in {:?}",
            metadata.len(),
            hashes.len(),
            start.elapsed()
        );
        metadata
    }

    /// Subset of `hashes` that have a payload or metadata on disk
    pub async fn existing(&self, hashes: &[ContentHash]) -> Vec<ContentHash> {
        let mut existing = Vec::new();
        for hash in hashes.iter().filter(|h| Self::is_valid_key(h)) {
            let data = tokio::fs::try_exists(self.data_path(hash)).await.unwrap_or(false);
            let meta = tokio::fs::try_exists(self.meta_path(hash)).await.unwrap_or(false);
            if data || meta {
                existing.push(hash.clone());
            }
        }
        existing
    }

    /// Total bytes used by the attachments directory
    pub async fn total_size(&self) -> Result<u64> {
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(0);
        }

        let mut total = 0u64;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(metadata) = entry.metadata().await {
                if metadata.is_file() {
                    total += metadata.len();
                }
            }
        }
        Ok(total)
    }

    /// Count stored payloads by MIME family
    ///
    /// Uses sidecar metadata when present, otherwise sniffs the payload.
    pub async fn count_by_type(&self) -> Result<AttachmentCounts> {
        let mut counts = AttachmentCounts::default();
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(counts);
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("dat") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let hash = ContentHash::from(stem);

            let mime_type = match self.read_meta(&hash).await {
                Some(meta) => meta.mime_type,
                None => match tokio::fs::read(&path).await {
                    Ok(payload) => sniff_mime(&payload),
                    Err(_) => continue,
                },
            };
            counts.record(&mime_type);
        }
        Ok(counts)
    }
}

#[async_trait]
impl AttachmentStore for FsAttachmentStore {
    async fn load(&self, hash: &ContentHash) -> std::result::Result<Attachment, AttachmentError> {
        if !Self::is_valid_key(hash) {
            return Err(AttachmentError::NotFound(hash.clone()));
        }

        let payload = match tokio::fs::read(self.data_path(hash)).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AttachmentError::NotFound(hash.clone()));
            }
            Err(e) => {
                return Err(AttachmentError::Store {
                    hash: hash.clone(),
                    reason: e.to_string(),
                });
            }
        };

        if payload.is_empty() {
            return Err(AttachmentError::Decode {
                hash: hash.clone(),
                reason: "empty payload".to_string(),
            });
        }

        if content_hash(&payload) != *hash {
            return Err(AttachmentError::Decode {
                hash: hash.clone(),
                reason: "payload does not match its content hash".to_string(),
            });
        }

        let mime_type = match self.read_meta(hash).await {
            Some(meta) => meta.mime_type,
            None => sniff_mime(&payload),
        };

        Ok(Attachment {
            hash: hash.clone(),
            mime_type,
            payload,
        })
    }

    async fn save(&self, payload: Vec<u8>, mime_type: &str) -> Result<ContentHash> {
        let hash = content_hash(&payload);
        tokio::fs::create_dir_all(&self.dir).await?;

        let data_path = self.data_path(&hash);
        if tokio::fs::try_exists(&data_path).await? {
            debug!("Attachment {} already stored", hash);
            return Ok(hash);
        }

        let meta = AttachmentMeta {
            id: hash.to_string(),
            attachment_type: mime_type.split('/').next().unwrap_or("file").to_string(),
            name: String::new(),
            mime_type: mime_type.to_string(),
            size: payload.len() as u64,
        };

        // Write to a temp name first so readers never observe a partial payload
        let tmp_path = self.dir.join(format!("{}.dat.tmp", hash));
        tokio::fs::write(&tmp_path, &payload).await?;
        tokio::fs::rename(&tmp_path, &data_path).await?;
        tokio::fs::write(self.meta_path(&hash), serde_json::to_vec_pretty(&meta)?).await?;

        info!("Stored attachment {} ({} bytes, {})", hash, payload.len(), mime_type);
        Ok(hash)
    }
}
