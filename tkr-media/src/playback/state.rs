//! Playback state machine

use crate::error::{Error, Result};
use serde::Serialize;
use tkr_common::events::{PlaybackMode, PlaybackStatus};
use uuid::Uuid;

/// Allowed transitions
///
/// ```text
/// idle    → loading
/// loading → ready | error
/// ready   → playing | seeking
/// playing → paused | seeking | ended
/// paused  → playing | seeking
/// seeking → ready | playing | paused | seeking | ended
/// ended   → seeking
/// error   → loading          (explicit retry only)
/// any     → idle             (dispose)
/// ```
pub fn can_transition(from: PlaybackStatus, to: PlaybackStatus) -> bool {
    use PlaybackStatus as S;

    if to == S::Idle {
        return true;
    }
    matches!(
        (from, to),
        (S::Idle, S::Loading)
            | (S::Loading, S::Ready)
            | (S::Loading, S::Error)
            | (S::Ready, S::Playing)
            | (S::Ready, S::Seeking)
            | (S::Playing, S::Paused)
            | (S::Playing, S::Seeking)
            | (S::Playing, S::Ended)
            | (S::Paused, S::Playing)
            | (S::Paused, S::Seeking)
            | (S::Seeking, S::Ready)
            | (S::Seeking, S::Playing)
            | (S::Seeking, S::Paused)
            | (S::Seeking, S::Seeking)
            | (S::Seeking, S::Ended)
            | (S::Ended, S::Seeking)
            | (S::Error, S::Loading)
    )
}

/// Current status plus where an in-progress seek returns to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMachine {
    status: PlaybackStatus,
    resume: PlaybackStatus,
}

impl StatusMachine {
    pub fn new() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            resume: PlaybackStatus::Ready,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    /// State a seek in progress will settle into
    pub fn resume_target(&self) -> PlaybackStatus {
        self.resume
    }

    pub fn set_resume_target(&mut self, resume: PlaybackStatus) {
        self.resume = resume;
    }

    /// Move to `to`, returning the previous status
    pub fn transition(&mut self, to: PlaybackStatus) -> Result<PlaybackStatus> {
        if !can_transition(self.status, to) {
            return Err(Error::InvalidState(format!(
                "cannot go from {} to {}",
                self.status, to
            )));
        }
        let old = self.status;
        self.status = to;
        Ok(old)
    }
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of one playback session, as reported to the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub playback_id: Uuid,
    pub mode: PlaybackMode,
    pub status: PlaybackStatus,
    pub current_time: f64,
    pub duration: f64,
    pub is_playing: bool,
    /// Last measured audio/video drift; legacy sync only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<f64>,
    /// Human-readable reason when `status` is `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
