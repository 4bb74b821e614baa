//! Media source resolver
//!
//! Chooses how a session is played back from its media fields alone. Pure:
//! no I/O, no attachment loads, cannot fail.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tkr_common::events::PlaybackMode;
use tkr_common::{AudioSegment, ContentHash, Session, VideoChunk};

/// Playback strategy for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaStrategy {
    /// Screenshot-only session; nothing to play
    None,
    /// Audio segments concatenated into one source, no video
    AudioOnlyConcat,
    /// Single pre-merged file (already carries the session audio)
    VideoWithOptimizedFile,
    /// Raw video plus separately clocked concatenated audio
    VideoLegacySync,
}

impl MediaStrategy {
    pub fn mode(&self) -> PlaybackMode {
        match self {
            MediaStrategy::None => PlaybackMode::None,
            MediaStrategy::AudioOnlyConcat => PlaybackMode::AudioOnly,
            MediaStrategy::VideoWithOptimizedFile => PlaybackMode::OptimizedSingleFile,
            MediaStrategy::VideoLegacySync => PlaybackMode::LegacySync,
        }
    }
}

impl fmt::Display for MediaStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaStrategy::None => write!(f, "none"),
            MediaStrategy::AudioOnlyConcat => write!(f, "audio-only-concat"),
            MediaStrategy::VideoWithOptimizedFile => write!(f, "video-with-optimized-file"),
            MediaStrategy::VideoLegacySync => write!(f, "video-legacy-sync"),
        }
    }
}

/// Select the playback strategy, in priority order:
///
/// 1. no audio and no video → `None`
/// 2. video with an optimized path → `VideoWithOptimizedFile`, even when
///    audio segments exist
/// 3. video without an optimized path → `VideoLegacySync`
/// 4. audio only → `AudioOnlyConcat`
pub fn resolve(session: &Session) -> MediaStrategy {
    match &session.video {
        Some(video) if video.is_optimized() => MediaStrategy::VideoWithOptimizedFile,
        Some(_) => MediaStrategy::VideoLegacySync,
        None if session.audio_segments.is_empty() => MediaStrategy::None,
        None => MediaStrategy::AudioOnlyConcat,
    }
}

/// Everything the playback engine needs for one strategy
///
/// The optimized variant structurally carries no audio segments, so that
/// path has nothing to concatenate. Audio-carrying variants keep the session
/// start as timeline zero, shared with the legacy video.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackPlan {
    None,
    OptimizedFile {
        path: ContentHash,
        duration_hint: Option<f64>,
    },
    AudioOnly {
        session_start: DateTime<Utc>,
        segments: Vec<AudioSegment>,
    },
    LegacySync {
        session_start: DateTime<Utc>,
        raw_path: Option<ContentHash>,
        chunks: Vec<VideoChunk>,
        duration_hint: Option<f64>,
        segments: Vec<AudioSegment>,
    },
}

impl PlaybackPlan {
    /// Extract the media inputs `strategy` needs from `session`
    ///
    /// A strategy that does not match the session's media yields `None`.
    pub fn from_session(session: &Session, strategy: MediaStrategy) -> Self {
        match (strategy, &session.video) {
            (MediaStrategy::VideoWithOptimizedFile, Some(video)) => match &video.optimized_path {
                Some(path) => PlaybackPlan::OptimizedFile {
                    path: path.clone(),
                    duration_hint: video.duration,
                },
                None => PlaybackPlan::None,
            },
            (MediaStrategy::VideoLegacySync, Some(video)) => PlaybackPlan::LegacySync {
                session_start: session.start_time,
                raw_path: video.raw_path.clone(),
                chunks: video.chunks.clone(),
                duration_hint: video.duration,
                segments: session.audio_segments.clone(),
            },
            (MediaStrategy::AudioOnlyConcat, _) if !session.audio_segments.is_empty() => {
                PlaybackPlan::AudioOnly {
                    session_start: session.start_time,
                    segments: session.audio_segments.clone(),
                }
            }
            _ => PlaybackPlan::None,
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        match self {
            PlaybackPlan::None => PlaybackMode::None,
            PlaybackPlan::OptimizedFile { .. } => PlaybackMode::OptimizedSingleFile,
            PlaybackPlan::AudioOnly { .. } => PlaybackMode::AudioOnly,
            PlaybackPlan::LegacySync { .. } => PlaybackMode::LegacySync,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, PlaybackPlan::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tkr_common::VideoDescriptor;

    fn session() -> Session {
        Session::new("s1", Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap())
    }

    fn with_audio(mut session: Session, count: usize) -> Session {
        for i in 0..count {
            session.audio_segments.push(AudioSegment {
                id: format!("a{}", i),
                timestamp: session.start_time + chrono::Duration::seconds(i as i64 * 10),
                duration: 10.0,
                hash: format!("h{}", i).into(),
                transcription: None,
            });
        }
        session
    }

    #[test]
    fn test_priority_rules() {
        assert_eq!(resolve(&session()), MediaStrategy::None);
        assert_eq!(resolve(&with_audio(session(), 2)), MediaStrategy::AudioOnlyConcat);

        let mut legacy = with_audio(session(), 2);
        legacy.video = Some(VideoDescriptor::legacy("raw", vec![]));
        assert_eq!(resolve(&legacy), MediaStrategy::VideoLegacySync);

        let mut optimized = with_audio(session(), 2);
        optimized.video = Some(VideoDescriptor::optimized("merged"));
        assert_eq!(resolve(&optimized), MediaStrategy::VideoWithOptimizedFile);
    }

    #[test]
    fn test_optimized_wins_over_raw() {
        let mut s = session();
        let mut video = VideoDescriptor::legacy("raw", vec![]);
        video.optimized_path = Some("merged".into());
        s.video = Some(video);
        assert_eq!(resolve(&s), MediaStrategy::VideoWithOptimizedFile);
    }

    #[test]
    fn test_video_without_audio_is_legacy() {
        let mut s = session();
        s.video = Some(VideoDescriptor::legacy("raw", vec![]));
        assert_eq!(resolve(&s), MediaStrategy::VideoLegacySync);
        assert_eq!(resolve(&s).mode(), PlaybackMode::LegacySync);
    }

    #[test]
    fn test_optimized_plan_drops_segments() {
        let mut s = with_audio(session(), 20);
        s.video = Some(VideoDescriptor::optimized("merged"));
        let plan = PlaybackPlan::from_session(&s, resolve(&s));
        assert_eq!(
            plan,
            PlaybackPlan::OptimizedFile {
                path: "merged".into(),
                duration_hint: None
            }
        );
        assert_eq!(plan.mode(), PlaybackMode::OptimizedSingleFile);
    }

    #[test]
    fn test_audio_plans_carry_session_start() {
        let s = with_audio(session(), 2);
        match PlaybackPlan::from_session(&s, MediaStrategy::AudioOnlyConcat) {
            PlaybackPlan::AudioOnly { session_start, segments } => {
                assert_eq!(session_start, s.start_time);
                assert_eq!(segments.len(), 2);
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_strategy_yields_none_plan() {
        let s = session();
        assert!(PlaybackPlan::from_session(&s, MediaStrategy::AudioOnlyConcat).is_none());
        assert!(PlaybackPlan::from_session(&s, MediaStrategy::VideoLegacySync).is_none());
    }
}
