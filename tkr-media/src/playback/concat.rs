//! Concatenated audio source
//!
//! Plays an `AudioTimeline` as one continuous source. Silence gaps play as
//! silence, a segment still loading stalls the clock (and is promoted), and
//! a segment that failed to load is skipped with a notice.

use super::element::MediaElement;
use crate::timeline::{AudioTimeline, SegmentStatus};
use tracing::{debug, warn};

/// Playback jumped over a segment that failed to load
#[derive(Debug, Clone, PartialEq)]
pub struct SkipNotice {
    pub segment_index: usize,
    pub segment_id: String,
    pub reason: String,
    /// Timeline position playback resumed from
    pub resumed_at: f64,
}

pub struct ConcatAudioSource {
    timeline: AudioTimeline,
    position: f64,
    playing: bool,
    ended: bool,
    skips: Vec<SkipNotice>,
}

impl ConcatAudioSource {
    pub fn new(timeline: AudioTimeline) -> Self {
        Self {
            timeline,
            position: 0.0,
            playing: false,
            ended: false,
            skips: Vec::new(),
        }
    }

    pub fn timeline(&self) -> &AudioTimeline {
        &self.timeline
    }

    /// Current position sits on a segment that has not loaded yet
    pub fn is_buffering(&self) -> bool {
        if self.ended {
            return false;
        }
        match self.timeline.layout().seek(self.position) {
            Some(target) if target.silence_remaining == 0.0 => matches!(
                self.timeline.status(target.segment_index),
                Some(SegmentStatus::Pending | SegmentStatus::Loading)
            ),
            _ => false,
        }
    }

    /// Skip notices produced since the last call
    pub fn take_skips(&mut self) -> Vec<SkipNotice> {
        std::mem::take(&mut self.skips)
    }

    pub fn dispose(&self) {
        self.timeline.dispose();
    }
}

impl MediaElement for ConcatAudioSource {
    fn duration(&self) -> f64 {
        self.timeline.total_duration()
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
        let total = self.duration();
        let target = if seconds.is_nan() { 0.0 } else { seconds };
        self.position = target.clamp(0.0, total);
        self.ended = total > 0.0 && self.position >= total;
        // Promotes the target segment if it is still queued
        self.timeline.seek(self.position);
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn is_ended(&self) -> bool {
        self.ended
    }

    fn advance(&mut self, elapsed: f64) {
        if !self.playing || self.ended || elapsed <= 0.0 {
            return;
        }

        let total = self.duration();
        let mut remaining = elapsed;

        // Every iteration either consumes all of `remaining` or moves
        // `position` strictly forward to a boundary
        while remaining > 0.0 && self.position < total {
            let Some(target) = self.timeline.layout().seek(self.position) else {
                break;
            };
            let Some(entry) = self.timeline.layout().entry(target.segment_index) else {
                break;
            };

            if target.silence_remaining > 0.0 {
                if remaining >= target.silence_remaining {
                    remaining -= target.silence_remaining;
                    self.position = entry.offset;
                } else {
                    self.position += remaining;
                    remaining = 0.0;
                }
                continue;
            }

            match self.timeline.status(target.segment_index) {
                Some(SegmentStatus::Ready) => {
                    let left = entry.end() - self.position;
                    if remaining >= left {
                        remaining -= left;
                        self.position = entry.end();
                    } else {
                        self.position += remaining;
                        remaining = 0.0;
                    }
                }
                Some(SegmentStatus::Failed(error)) => {
                    warn!(
                        "Skipping audio segment {} ({}): {}",
                        target.segment_index, entry.segment.id, error.cause
                    );
                    self.position = entry.end();
                    self.skips.push(SkipNotice {
                        segment_index: target.segment_index,
                        segment_id: entry.segment.id.clone(),
                        reason: error.cause.to_string(),
                        resumed_at: self.position,
                    });
                }
                Some(SegmentStatus::Pending | SegmentStatus::Loading) | None => {
                    if self.timeline.promote(target.segment_index) {
                        debug!("Playback waiting on segment {}", target.segment_index);
                    }
                    break;
                }
            }
        }

        if total <= 0.0 || self.position >= total {
            self.position = total;
            self.ended = true;
            self.playing = false;
        }
    }
}
