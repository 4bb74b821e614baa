//! Media event types and EventBus
//!
//! Events are broadcast to every subscriber (UI bridge, loggers, tests) and
//! can be serialized for the UI layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Playback engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Seeking,
    Ended,
    Error,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackStatus::Idle => "idle",
            PlaybackStatus::Loading => "loading",
            PlaybackStatus::Ready => "ready",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Seeking => "seeking",
            PlaybackStatus::Ended => "ended",
            PlaybackStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Which playback path an engine is driving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackMode {
    None,
    OptimizedSingleFile,
    LegacySync,
    AudioOnly,
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackMode::None => "none",
            PlaybackMode::OptimizedSingleFile => "optimizedSingleFile",
            PlaybackMode::LegacySync => "legacySync",
            PlaybackMode::AudioOnly => "audioOnly",
        };
        f.write_str(name)
    }
}

/// Media engine events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MediaEvent {
    /// Engine state machine transition
    StateChanged {
        playback_id: Uuid,
        old_state: PlaybackStatus,
        new_state: PlaybackStatus,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic position report (one per tick while loaded)
    TimeUpdate {
        playback_id: Uuid,
        current_time: f64,
        duration: f64,
        is_playing: bool,
        /// Audio/video drift, legacy sync only
        drift: Option<f64>,
    },

    /// Playback reached a segment that failed to load and jumped past it
    SegmentSkipped {
        playback_id: Uuid,
        segment_index: usize,
        segment_id: String,
        reason: String,
        resumed_at: f64,
    },

    /// Follower audio was repositioned onto the video clock
    DriftCorrected {
        playback_id: Uuid,
        drift: f64,
        corrected_to: f64,
    },

    /// Drift stayed above threshold after repeated corrections
    ///
    /// Informational only; the engine keeps correcting.
    DriftUnrecoverable {
        playback_id: Uuid,
        drift: f64,
        corrections: u32,
    },

    /// Master media reached its natural end
    PlaybackEnded { playback_id: Uuid, position: f64 },

    /// Media could not be loaded or decoded; engine is in `error`
    PlaybackError { playback_id: Uuid, reason: String },
}

impl MediaEvent {
    /// Engine instance that emitted this event
    pub fn playback_id(&self) -> Uuid {
        match self {
            MediaEvent::StateChanged { playback_id, .. }
            | MediaEvent::TimeUpdate { playback_id, .. }
            | MediaEvent::SegmentSkipped { playback_id, .. }
            | MediaEvent::DriftCorrected { playback_id, .. }
            | MediaEvent::DriftUnrecoverable { playback_id, .. }
            | MediaEvent::PlaybackEnded { playback_id, .. }
            | MediaEvent::PlaybackError { playback_id, .. } => *playback_id,
        }
    }
}

/// Broadcast bus for media events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MediaEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: MediaEvent) -> Result<usize, broadcast::error::SendError<MediaEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MediaEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
