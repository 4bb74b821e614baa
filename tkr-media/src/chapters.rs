//! Chapter index
//!
//! Chapters are half-open `[start_time, end_time)` ranges in seconds from the
//! session start. Lookups binary-search a list sorted by `start_time`; sorting
//! happens once per chapter-list change, never per lookup.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tkr_common::models::TimelineItem;
use tkr_common::time::seconds_between;
use tkr_common::Chapter;
use tracing::warn;

/// Group key for `group_items_by_chapter`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "id")]
pub enum ChapterGroupKey {
    Chapter(String),
    Uncategorized,
}

impl fmt::Display for ChapterGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChapterGroupKey::Chapter(id) => f.write_str(id),
            ChapterGroupKey::Uncategorized => f.write_str("uncategorized"),
        }
    }
}

/// Sort chapters ascending by start time (stable)
pub fn sort_chapters_by_time(mut chapters: Vec<Chapter>) -> Vec<Chapter> {
    chapters.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    chapters
}

/// Chapter whose `[start_time, end_time)` contains `seconds`
///
/// `sorted` must be ascending by `start_time`. Times before the first
/// chapter, after the last, or in a gap between chapters yield `None`.
pub fn find_chapter_for_time(seconds: f64, sorted: &[Chapter]) -> Option<&Chapter> {
    if !seconds.is_finite() {
        return None;
    }

    // First chapter starting after `seconds`; the candidate is the one before it
    let idx = sorted.partition_point(|c| c.start_time <= seconds);
    let candidate = sorted.get(idx.checked_sub(1)?)?;
    (seconds < candidate.end_time).then_some(candidate)
}

/// Partition timeline items by the chapter containing their timestamp
///
/// Every item lands in exactly one group. Items keep their input order within
/// a group.
pub fn group_items_by_chapter<T: TimelineItem>(
    items: impl IntoIterator<Item = T>,
    sorted: &[Chapter],
    session_start: DateTime<Utc>,
) -> BTreeMap<ChapterGroupKey, Vec<T>> {
    let mut groups: BTreeMap<ChapterGroupKey, Vec<T>> = BTreeMap::new();
    for item in items {
        let seconds = seconds_between(session_start, item.timestamp());
        let key = match find_chapter_for_time(seconds, sorted) {
            Some(chapter) => ChapterGroupKey::Chapter(chapter.id.clone()),
            None => ChapterGroupKey::Uncategorized,
        };
        groups.entry(key).or_default().push(item);
    }
    groups
}

/// Start times strictly increasing
pub fn is_chapters_sorted(chapters: &[Chapter]) -> bool {
    chapters.windows(2).all(|w| w[0].start_time < w[1].start_time)
}

/// Each chapter ends at or before the next one starts
pub fn is_chapters_non_overlapping(chapters: &[Chapter]) -> bool {
    chapters.windows(2).all(|w| w[0].end_time <= w[1].start_time)
}

/// Sorted chapter list for one session
#[derive(Debug, Clone, Default)]
pub struct ChapterIndex {
    chapters: Vec<Chapter>,
}

impl ChapterIndex {
    pub fn new(chapters: Vec<Chapter>) -> Self {
        let chapters = sort_chapters_by_time(chapters);
        if !is_chapters_sorted(&chapters) || !is_chapters_non_overlapping(&chapters) {
            warn!(
                "Chapter list ({} chapters) has duplicate starts or overlapping ranges",
                chapters.len()
            );
        }
        Self { chapters }
    }

    /// Swap in a new chapter list (after enrichment), re-sorting once
    pub fn replace(&mut self, chapters: Vec<Chapter>) {
        *self = Self::new(chapters);
    }

    pub fn chapter_at(&self, seconds: f64) -> Option<&Chapter> {
        find_chapter_for_time(seconds, &self.chapters)
    }

    pub fn chapter_by_id(&self, id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == id)
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn group<T: TimelineItem>(
        &self,
        items: impl IntoIterator<Item = T>,
        session_start: DateTime<Utc>,
    ) -> BTreeMap<ChapterGroupKey, Vec<T>> {
        group_items_by_chapter(items, &self.chapters, session_start)
    }
}
