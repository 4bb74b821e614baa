//! Media elements and backends
//!
//! A `MediaElement` is one independently clocked playable handle (a video
//! or a pre-merged file). The engine drives elements by wall-clock ticks;
//! it never decodes anything itself. Backends turn loaded attachments into
//! elements.

use crate::error::{Error, Result};
use crate::store::Attachment;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// One playable media handle with its own clock
pub trait MediaElement: Send {
    /// Length in seconds
    fn duration(&self) -> f64;

    fn current_time(&self) -> f64;

    fn play(&mut self);

    fn pause(&mut self);

    /// Jump to `seconds`, clamped to `[0, duration]`
    fn seek(&mut self, seconds: f64);

    fn is_playing(&self) -> bool;

    fn is_ended(&self) -> bool;

    /// Let `elapsed` seconds of wall time pass
    fn advance(&mut self, elapsed: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Loaded input for a backend
#[derive(Debug, Clone)]
pub struct MediaSource {
    pub kind: MediaKind,
    pub primary: Arc<Attachment>,
    /// Additional pieces (legacy video chunks)
    pub parts: Vec<Arc<Attachment>>,
    /// Duration recorded with the session, when known
    pub duration_hint: Option<f64>,
}

/// Opens media elements
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Fails with `MediaUnsupportedOrCorrupt` when the source cannot be played
    async fn open(&self, source: MediaSource) -> Result<Box<dyn MediaElement>>;
}

/// Backend producing clock-driven elements
///
/// Accepts audio/video payloads with a known duration. Used headless (CLI
/// simulation, tests) where no platform player exists.
#[derive(Debug, Clone)]
pub struct VirtualBackend {
    rate: f64,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self { rate: 1.0 }
    }

    /// Elements run at `rate` × wall time
    pub fn with_rate(rate: f64) -> Self {
        Self { rate }
    }
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn is_playable_mime(mime_type: &str) -> bool {
    mime_type.starts_with("audio/")
        || mime_type.starts_with("video/")
        || mime_type == crate::store::OCTET_STREAM
}

#[async_trait]
impl MediaBackend for VirtualBackend {
    async fn open(&self, source: MediaSource) -> Result<Box<dyn MediaElement>> {
        for attachment in std::iter::once(&source.primary).chain(source.parts.iter()) {
            if attachment.payload.is_empty() {
                return Err(Error::MediaUnsupportedOrCorrupt(format!(
                    "{} has an empty payload",
                    attachment.hash
                )));
            }
            if !is_playable_mime(&attachment.mime_type) {
                return Err(Error::MediaUnsupportedOrCorrupt(format!(
                    "{} has unsupported type {}",
                    attachment.hash, attachment.mime_type
                )));
            }
        }

        let duration = match source.duration_hint {
            Some(d) if d.is_finite() && d > 0.0 => d,
            _ => {
                return Err(Error::MediaUnsupportedOrCorrupt(format!(
                    "{} has unknown duration",
                    source.primary.hash
                )))
            }
        };

        debug!(
            "Opened virtual {:?} element for {} ({:.1}s, {} parts)",
            source.kind,
            source.primary.hash,
            duration,
            source.parts.len()
        );
        Ok(Box::new(VirtualElement::with_rate(duration, self.rate)))
    }
}

/// Element whose position is driven only by `advance`
#[derive(Debug, Clone)]
pub struct VirtualElement {
    duration: f64,
    position: f64,
    rate: f64,
    playing: bool,
    ended: bool,
}

impl VirtualElement {
    pub fn new(duration: f64) -> Self {
        Self::with_rate(duration, 1.0)
    }

    pub fn with_rate(duration: f64, rate: f64) -> Self {
        Self {
            duration: duration.max(0.0),
            position: 0.0,
            rate,
            playing: false,
            ended: false,
        }
    }
}

impl MediaElement for VirtualElement {
    fn duration(&self) -> f64 {
        self.duration
    }

    fn current_time(&self) -> f64 {
        self.position
    }

    fn play(&mut self) {
        if !self.ended {
            self.playing = true;
        }
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn seek(&mut self, seconds: f64) {
        let target = if seconds.is_nan() { 0.0 } else { seconds };
        self.position = target.clamp(0.0, self.duration);
        self.ended = self.position >= self.duration;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn is_ended(&self) -> bool {
        self.ended
    }

    fn advance(&mut self, elapsed: f64) {
        if !self.playing || elapsed <= 0.0 {
            return;
        }
        self.position += elapsed * self.rate;
        if self.position >= self.duration {
            self.position = self.duration;
            self.ended = true;
            self.playing = false;
        }
    }
}
