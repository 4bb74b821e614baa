//! Session media records
//!
//! Read-only inputs supplied by the capture/storage layer. Field names follow
//! the camelCase JSON written by the desktop app (`sessions.json`).

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content address of an attachment (lowercase SHA-256 hex of its payload)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentHash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ContentHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Paused,
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Anything placed on the session timeline by absolute timestamp
pub trait TimelineItem {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl<T: TimelineItem + ?Sized> TimelineItem for &T {
    fn timestamp(&self) -> DateTime<Utc> {
        (**self).timestamp()
    }
}

/// Screenshot captured during a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotEvent {
    pub id: String,
    #[serde(alias = "attachmentId")]
    pub attachment_hash: ContentHash,
    pub timestamp: DateTime<Utc>,
}

impl TimelineItem for ScreenshotEvent {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// One discrete recorded audio segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSegment {
    pub id: String,
    /// Absolute capture time of the first sample
    pub timestamp: DateTime<Utc>,
    /// Length in seconds
    pub duration: f64,
    #[serde(alias = "attachmentId")]
    pub hash: ContentHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
}

impl AudioSegment {
    /// Absolute time just past the last sample
    pub fn end_timestamp(&self) -> DateTime<Utc> {
        self.timestamp + chrono::Duration::milliseconds((self.duration * 1000.0).round() as i64)
    }
}

impl TimelineItem for AudioSegment {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// One piece of a legacy (unmerged) video recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoChunk {
    pub hash: ContentHash,
    /// Seconds relative to session start
    pub start_time: f64,
    pub duration: f64,
}

/// Video attached to a session
///
/// Either a single pre-merged file (`optimized_path`, which already carries
/// the session audio) or a legacy raw recording plus chunks that needs runtime
/// audio sync. When both are present `optimized_path` is authoritative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_path: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_path: Option<ContentHash>,
    #[serde(default)]
    pub chunks: Vec<VideoChunk>,
    /// Duration hint in seconds, when the recorder knew it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl VideoDescriptor {
    pub fn optimized(path: impl Into<ContentHash>) -> Self {
        Self {
            optimized_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn legacy(raw_path: impl Into<ContentHash>, chunks: Vec<VideoChunk>) -> Self {
        Self {
            raw_path: Some(raw_path.into()),
            chunks,
            ..Default::default()
        }
    }

    pub fn is_optimized(&self) -> bool {
        self.optimized_path.is_some()
    }
}

/// AI-derived chapter of a session
///
/// Times are seconds relative to the session start, half-open `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub key_topics: Vec<String>,
}

impl Chapter {
    pub fn new(id: impl Into<String>, start_time: f64, end_time: f64, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_time,
            end_time,
            title: title.into(),
            summary: String::new(),
            confidence: 1.0,
            key_topics: Vec::new(),
        }
    }

    pub fn contains(&self, seconds: f64) -> bool {
        seconds >= self.start_time && seconds < self.end_time
    }
}

/// Recorded capture session (aggregate root)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub screenshots: Vec<ScreenshotEvent>,
    #[serde(default)]
    pub audio_segments: Vec<AudioSegment>,
    #[serde(default)]
    pub video: Option<VideoDescriptor>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl Session {
    /// Create an empty active session starting at `start_time`
    pub fn new(id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            start_time,
            end_time: None,
            status: SessionStatus::Active,
            screenshots: Vec::new(),
            audio_segments: Vec::new(),
            video: None,
            chapters: Vec::new(),
            notes: None,
            transcript: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Seconds from session start to `timestamp` (negative if before start)
    pub fn relative_seconds(&self, timestamp: DateTime<Utc>) -> f64 {
        crate::time::seconds_between(self.start_time, timestamp)
    }

    /// Replace the chapter list after enrichment completes
    ///
    /// Allowed for completed sessions as well; chapters are enrichment data.
    pub fn replace_chapters(&mut self, chapters: Vec<Chapter>) {
        self.chapters = chapters;
    }

    /// Check the record invariants
    ///
    /// Every timestamp must be at or after `start_time`, durations must be
    /// finite and non-negative, chapter ranges must be well formed.
    pub fn validate(&self) -> Result<()> {
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(Error::InvalidInput(format!(
                    "session {} ends before it starts",
                    self.id
                )));
            }
        }

        for shot in &self.screenshots {
            if shot.timestamp < self.start_time {
                return Err(Error::InvalidInput(format!(
                    "screenshot {} precedes session start",
                    shot.id
                )));
            }
        }

        for segment in &self.audio_segments {
            if segment.timestamp < self.start_time {
                return Err(Error::InvalidInput(format!(
                    "audio segment {} precedes session start",
                    segment.id
                )));
            }
            if !segment.duration.is_finite() || segment.duration < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "audio segment {} has invalid duration {}",
                    segment.id, segment.duration
                )));
            }
        }

        for chapter in &self.chapters {
            if chapter.start_time < 0.0 || chapter.end_time < chapter.start_time {
                return Err(Error::InvalidInput(format!(
                    "chapter {} has invalid range [{}, {})",
                    chapter.id, chapter.start_time, chapter.end_time
                )));
            }
            if !(0.0..=1.0).contains(&chapter.confidence) {
                return Err(Error::InvalidInput(format!(
                    "chapter {} confidence {} outside [0, 1]",
                    chapter.id, chapter.confidence
                )));
            }
        }

        Ok(())
    }
}

/// Lightweight session summary (no full data arrays)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub screenshot_count: usize,
    pub audio_segment_count: usize,
    pub chapter_count: usize,
    pub has_video: bool,
    pub has_notes: bool,
    pub has_transcript: bool,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        let non_empty = |text: &Option<String>| text.as_deref().is_some_and(|t| !t.is_empty());

        SessionSummary {
            id: session.id.clone(),
            name: session.name.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
            status: session.status,
            screenshot_count: session.screenshots.len(),
            audio_segment_count: session.audio_segments.len(),
            chapter_count: session.chapters.len(),
            has_video: session.video.is_some(),
            has_notes: non_empty(&session.notes),
            has_transcript: non_empty(&session.transcript),
        }
    }
}
