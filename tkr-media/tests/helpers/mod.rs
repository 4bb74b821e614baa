//! Test helpers for tkr-media integration tests
//!
//! Session builders over an in-memory attachment store, plus a backend whose
//! video element can be knocked off its clock to exercise drift correction.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tkr_common::{AudioSegment, ContentHash, Session, VideoDescriptor};
use tkr_media::config::MediaConfig;
use tkr_media::error::Result;
use tkr_media::playback::{MediaBackend, MediaElement, MediaSource, VirtualBackend, VirtualElement};
use tkr_media::{MediaService, MemoryAttachmentStore};

pub fn session_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

pub fn at(seconds: f64) -> DateTime<Utc> {
    session_start() + ChronoDuration::milliseconds((seconds * 1000.0).round() as i64)
}

/// Builds sessions whose attachments live in one memory store
pub struct SessionBuilder {
    store: Arc<MemoryAttachmentStore>,
    session: Session,
    next_payload: u8,
}

impl SessionBuilder {
    pub fn new(store: &Arc<MemoryAttachmentStore>, id: &str) -> Self {
        Self {
            store: Arc::clone(store),
            session: Session::new(id, session_start()),
            next_payload: 1,
        }
    }

    fn payload(&mut self) -> Vec<u8> {
        let byte = self.next_payload;
        self.next_payload = self.next_payload.wrapping_add(1);
        vec![byte; 256]
    }

    /// Audio segment captured at `start` seconds for `duration` seconds
    pub fn audio(mut self, start: f64, duration: f64) -> Self {
        let payload = self.payload();
        let hash = self.store.insert(payload, "audio/webm");
        let index = self.session.audio_segments.len();
        self.session.audio_segments.push(AudioSegment {
            id: format!("seg-{}", index),
            timestamp: at(start),
            duration,
            hash,
            transcription: None,
        });
        self
    }

    /// `count` contiguous segments of `duration` seconds each
    pub fn contiguous_audio(self, count: usize, duration: f64) -> Self {
        self.contiguous_audio_from(0.0, count, duration)
    }

    /// Contiguous segments, the first captured `start` seconds into the session
    pub fn contiguous_audio_from(mut self, start: f64, count: usize, duration: f64) -> Self {
        for i in 0..count {
            self = self.audio(start + i as f64 * duration, duration);
        }
        self
    }

    pub fn optimized_video(mut self, duration: f64) -> Self {
        let payload = self.payload();
        let hash = self.store.insert(payload, "video/mp4");
        let mut video = VideoDescriptor::optimized(hash);
        video.duration = Some(duration);
        self.session.video = Some(video);
        self
    }

    pub fn legacy_video(mut self, duration: f64) -> Self {
        let payload = self.payload();
        let hash = self.store.insert(payload, "video/webm");
        let mut video = VideoDescriptor::legacy(hash, Vec::new());
        video.duration = Some(duration);
        self.session.video = Some(video);
        self
    }

    pub fn build(self) -> Session {
        self.session
    }
}

pub fn segment_hashes(session: &Session) -> Vec<ContentHash> {
    session.audio_segments.iter().map(|s| s.hash.clone()).collect()
}

pub fn service_with(
    store: &Arc<MemoryAttachmentStore>,
    backend: Arc<dyn MediaBackend>,
    config: MediaConfig,
) -> MediaService {
    MediaService::new(store.clone(), backend, config)
}

pub fn virtual_service(store: &Arc<MemoryAttachmentStore>) -> MediaService {
    service_with(store, Arc::new(VirtualBackend::new()), MediaConfig::default())
}

/// Pending clock jump shared between a test and the element it controls
#[derive(Debug, Clone, Default)]
pub struct ClockJump {
    millis: Arc<AtomicI64>,
}

impl ClockJump {
    /// Next `advance` of the element lands this many seconds further on;
    /// negative values set the element back
    pub fn schedule(&self, seconds: f64) {
        self.millis.store((seconds * 1000.0).round() as i64, Ordering::SeqCst);
    }

    fn take(&self) -> f64 {
        self.millis.swap(0, Ordering::SeqCst) as f64 / 1000.0
    }
}

/// Virtual element that applies a scheduled clock jump on its next advance
pub struct JumpingElement {
    inner: VirtualElement,
    jump: ClockJump,
}

impl MediaElement for JumpingElement {
    fn duration(&self) -> f64 {
        self.inner.duration()
    }

    fn current_time(&self) -> f64 {
        self.inner.current_time()
    }

    fn play(&mut self) {
        self.inner.play();
    }

    fn pause(&mut self) {
        self.inner.pause();
    }

    fn seek(&mut self, seconds: f64) {
        self.inner.seek(seconds);
    }

    fn is_playing(&self) -> bool {
        self.inner.is_playing()
    }

    fn is_ended(&self) -> bool {
        self.inner.is_ended()
    }

    fn advance(&mut self, elapsed: f64) {
        let jump = self.jump.take();
        if jump >= 0.0 {
            self.inner.advance(elapsed + jump);
        } else if self.inner.is_playing() {
            let target = self.inner.current_time() + elapsed + jump;
            self.inner.seek(target);
        }
    }
}

/// Backend whose elements all follow one `ClockJump`
pub struct JumpingBackend {
    pub jump: ClockJump,
    virtual_backend: VirtualBackend,
}

impl JumpingBackend {
    pub fn new() -> Self {
        Self {
            jump: ClockJump::default(),
            virtual_backend: VirtualBackend::new(),
        }
    }
}

#[async_trait]
impl MediaBackend for JumpingBackend {
    async fn open(&self, source: MediaSource) -> Result<Box<dyn MediaElement>> {
        // Reuse the virtual backend's validation, then swap in our element
        let checked = self.virtual_backend.open(source).await?;
        Ok(Box::new(JumpingElement {
            inner: VirtualElement::new(checked.duration()),
            jump: self.jump.clone(),
        }))
    }
}
