//! Audio timeline
//!
//! Presents a session's discrete audio segments as one seekable stream.
//!
//! **Offset policy:** segments are sorted by capture timestamp. The timeline
//! starts at its origin (the session start when playing a session). Each
//! segment starts where the previous one ended, unless the real-time gap
//! between them exceeds the silence tolerance; then the whole gap is kept as
//! silence so that timeline positions keep matching elapsed session time. The
//! gap between the origin and the first segment follows the same rule.
//! Overlapping segments are laid end to end and flagged.
//!
//! **Loading:** `AudioTimelineBuilder::build` loads a short startup prefix
//! through the attachment cache before returning, then hands the rest to a
//! background loader (see `loader`).

mod buffer;
mod loader;

pub use buffer::{SegmentBuffer, SegmentChain, SegmentState, SegmentStatus};
pub use loader::LoadProgress;

use crate::cache::AttachmentCache;
use crate::config::TimelineConfig;
use crate::resources::ResourceLedger;
use crate::store::Attachment;
use loader::{run_loader, LoaderShared};
use std::sync::atomic::{AtomicUsize, Ordering};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tkr_common::time::seconds_between;
use tkr_common::AudioSegment;
use tracing::{debug, info, warn};

/// Negative gaps smaller than this are timestamp rounding, not overlap
const OVERLAP_EPSILON: f64 = 0.001;

/// One segment placed on the logical timeline
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub segment: AudioSegment,
    /// Start of this segment on the timeline (seconds)
    pub offset: f64,
    /// Silence inserted between the previous segment (or the origin) and this one
    pub silence_before: f64,
    /// Capture timestamps overlap the previous segment
    pub overlaps_previous: bool,
}

impl TimelineEntry {
    pub fn duration(&self) -> f64 {
        self.segment.duration
    }

    pub fn end(&self) -> f64 {
        self.offset + self.segment.duration
    }
}

/// Where a timeline position lands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekTarget {
    pub segment_index: usize,
    /// Position within the segment (seconds)
    pub intra_offset: f64,
    /// Non-zero when the position falls in inserted silence: seconds of
    /// silence left before `segment_index` starts
    pub silence_remaining: f64,
}

/// Offsets and total duration for a list of segments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineLayout {
    entries: Vec<TimelineEntry>,
    total_duration: f64,
}

impl TimelineLayout {
    /// Sort segments by timestamp and assign offsets, starting the timeline
    /// at the earliest segment
    ///
    /// `tolerance_secs` is the largest gap closed up without silence.
    pub fn build(segments: &[AudioSegment], tolerance_secs: f64) -> Self {
        match segments.iter().map(|s| s.timestamp).min() {
            Some(origin) => Self::anchored(origin, segments, tolerance_secs),
            None => Self::default(),
        }
    }

    /// Like `build`, with timeline zero at `origin`
    ///
    /// A first segment captured more than `tolerance_secs` after `origin` is
    /// preceded by that much silence. Segments captured before `origin` start
    /// at zero.
    pub fn anchored(origin: DateTime<Utc>, segments: &[AudioSegment], tolerance_secs: f64) -> Self {
        let mut sorted = segments.to_vec();
        sorted.sort_by_key(|s| s.timestamp);

        let mut entries: Vec<TimelineEntry> = Vec::with_capacity(sorted.len());
        for segment in sorted {
            let (offset, silence_before, overlaps_previous) = match entries.last() {
                None => {
                    let lead = seconds_between(origin, segment.timestamp);
                    if lead > tolerance_secs {
                        (lead, lead, false)
                    } else {
                        (0.0, 0.0, false)
                    }
                }
                Some(prev) => {
                    let gap = seconds_between(prev.segment.timestamp, segment.timestamp) - prev.duration();
                    if gap < -OVERLAP_EPSILON {
                        warn!(
                            "Audio segment {} overlaps {} by {:.3}s",
                            segment.id, prev.segment.id, -gap
                        );
                        (prev.end(), 0.0, true)
                    } else if gap <= tolerance_secs {
                        (prev.end(), 0.0, false)
                    } else {
                        (prev.end() + gap, gap, false)
                    }
                }
            };
            entries.push(TimelineEntry {
                segment,
                offset,
                silence_before,
                overlaps_previous,
            });
        }

        let total_duration = entries.last().map(TimelineEntry::end).unwrap_or(0.0);
        Self {
            entries,
            total_duration,
        }
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&TimelineEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Segment durations plus inserted silence
    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn silence_total(&self) -> f64 {
        self.entries.iter().map(|e| e.silence_before).sum()
    }

    pub fn overlap_count(&self) -> usize {
        self.entries.iter().filter(|e| e.overlaps_previous).count()
    }

    /// Locate `seconds` on the timeline (binary search over offsets)
    ///
    /// Positions at or past the end map to the end of the last segment.
    /// Positions inside inserted silence map to the start of the following
    /// segment with `silence_remaining` set. Negative and NaN positions
    /// clamp to the start.
    pub fn seek(&self, seconds: f64) -> Option<SeekTarget> {
        let last = self.entries.len().checked_sub(1)?;
        let t = if seconds.is_nan() { 0.0 } else { seconds.max(0.0) };

        if t >= self.total_duration {
            return Some(SeekTarget {
                segment_index: last,
                intra_offset: self.entries[last].duration(),
                silence_remaining: 0.0,
            });
        }

        let first = &self.entries[0];
        if t < first.offset {
            // Leading silence before the first segment
            return Some(SeekTarget {
                segment_index: 0,
                intra_offset: 0.0,
                silence_remaining: first.offset - t,
            });
        }

        let index = self.entries.partition_point(|e| e.offset <= t).saturating_sub(1);
        let entry = &self.entries[index];
        if t < entry.end() {
            return Some(SeekTarget {
                segment_index: index,
                intra_offset: t - entry.offset,
                silence_remaining: 0.0,
            });
        }

        // In the silence after `entry`; t < total_duration guarantees a successor
        let next = (index + 1).min(last);
        Some(SeekTarget {
            segment_index: next,
            intra_offset: 0.0,
            silence_remaining: (self.entries[next].offset - t).max(0.0),
        })
    }

    /// Segments that make up the startup prefix
    ///
    /// Segments starting inside the first `window_secs` of audio (leading
    /// silence excluded), capped at `max_segments`, and never fewer than one.
    pub fn prefix_len(&self, window_secs: f64, max_segments: usize) -> usize {
        let Some(first) = self.entries.first() else {
            return 0;
        };
        let start = first.offset;
        let in_window = self.entries.partition_point(|e| e.offset - start < window_secs);
        in_window.min(max_segments).max(1)
    }
}

/// Builds audio timelines for sessions
///
/// Cloning shares the cache, the ledger and the build counter.
#[derive(Clone)]
pub struct AudioTimelineBuilder {
    cache: Arc<AttachmentCache>,
    ledger: ResourceLedger,
    config: TimelineConfig,
    builds: Arc<AtomicUsize>,
}

impl AudioTimelineBuilder {
    pub fn new(cache: Arc<AttachmentCache>, ledger: ResourceLedger, config: TimelineConfig) -> Self {
        Self {
            cache,
            ledger,
            config,
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of timelines built (concatenations performed) so far
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Concatenate segments into one timeline starting at the earliest segment
    pub async fn build(&self, segments: &[AudioSegment]) -> AudioTimeline {
        self.load(TimelineLayout::build(segments, self.config.silence_tolerance()))
            .await
    }

    /// Concatenate a session's segments with timeline zero at `session_start`
    ///
    /// Returns once the startup prefix has settled; the remaining segments
    /// load in the background. A failed segment is recorded on its slot and
    /// never fails the build.
    pub async fn build_from(&self, session_start: DateTime<Utc>, segments: &[AudioSegment]) -> AudioTimeline {
        self.load(TimelineLayout::anchored(
            session_start,
            segments,
            self.config.silence_tolerance(),
        ))
        .await
    }

    async fn load(&self, layout: TimelineLayout) -> AudioTimeline {
        self.builds.fetch_add(1, Ordering::SeqCst);

        let prefix = layout.prefix_len(self.config.prefix_window_secs, self.config.prefix_max_segments);
        info!(
            "Building audio timeline: {} segments, {:.1}s total ({:.1}s silence, {} overlaps), prefix {}",
            layout.len(),
            layout.total_duration(),
            layout.silence_total(),
            layout.overlap_count(),
            prefix
        );

        let shared = Arc::new(LoaderShared::new(
            layout,
            Arc::clone(&self.cache),
            self.ledger.clone(),
        ));

        {
            let mut state = shared.lock();
            for index in 0..prefix {
                state.chain.mark_loading(index);
            }
            for (index, entry) in shared.layout.entries().iter().enumerate().skip(prefix) {
                state.queue.push(index, entry.offset);
            }
        }

        futures::future::join_all((0..prefix).map(|index| shared.load_segment(index))).await;
        debug!("Startup prefix settled: {:?}", shared.progress());

        if shared.layout.len() > prefix {
            tokio::spawn(run_loader(Arc::clone(&shared)));
        }

        AudioTimeline { shared }
    }
}

/// One session's concatenated audio
///
/// Owns every segment buffer it loaded. `dispose` (or drop) stops background
/// loading and releases them.
pub struct AudioTimeline {
    shared: Arc<LoaderShared>,
}

impl AudioTimeline {
    pub fn layout(&self) -> &TimelineLayout {
        &self.shared.layout
    }

    pub fn total_duration(&self) -> f64 {
        self.shared.layout.total_duration()
    }

    pub fn len(&self) -> usize {
        self.shared.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.layout.is_empty()
    }

    /// Locate `seconds` and move the target segment to the front of the
    /// load queue if it has not been issued yet
    pub fn seek(&self, seconds: f64) -> Option<SeekTarget> {
        let target = self.shared.layout.seek(seconds)?;
        if self.promote(target.segment_index) {
            debug!(
                "Seek to {:.2}s promoted segment {}",
                seconds, target.segment_index
            );
        }
        Some(target)
    }

    /// Move a pending segment ahead of background loads
    pub fn promote(&self, index: usize) -> bool {
        self.shared.promote(index)
    }

    pub fn status(&self, index: usize) -> Option<SegmentStatus> {
        self.shared.lock().chain.state(index).map(SegmentState::status)
    }

    /// Loaded payload of a ready segment
    pub fn buffer(&self, index: usize) -> Option<Arc<Attachment>> {
        match self.shared.lock().chain.state(index)? {
            SegmentState::Ready(buffer) => Some(Arc::clone(buffer.attachment())),
            _ => None,
        }
    }

    pub fn progress(&self) -> LoadProgress {
        self.shared.progress()
    }

    pub fn loaded_bytes(&self) -> u64 {
        self.shared.lock().chain.loaded_bytes()
    }

    /// Wait until every segment is ready or failed, or the timeline is disposed
    pub async fn wait_until_settled(&self) -> LoadProgress {
        let mut progress = self.shared.subscribe();
        tokio::select! {
            result = progress.wait_for(LoadProgress::is_complete) => {
                result.map(|p| *p).unwrap_or_else(|_| self.progress())
            }
            _ = self.shared.cancel.cancelled() => self.progress(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Stop background loading and release all segment buffers
    ///
    /// Idempotent. Does not wait for a load in flight; its result is
    /// discarded when it arrives.
    pub fn dispose(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        let released = self.shared.dispose();
        debug!("Audio timeline disposed, released {} buffers", released);
    }
}

impl Drop for AudioTimeline {
    fn drop(&mut self) {
        self.dispose();
    }
}
