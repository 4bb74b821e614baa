//! Media service facade
//!
//! The one entry point the UI layer talks to. Owns the shared pieces (cache,
//! resource ledger, event bus, timeline builder) and hands out one
//! `PlaybackHandle` per opened session view. Per-session state, the chapter
//! index included, lives in the handle.

use crate::cache::{AttachmentCache, CacheStats};
use crate::chapters::{self, ChapterGroupKey, ChapterIndex};
use crate::config::MediaConfig;
use crate::error::{Error, Result};
use crate::playback::{EngineContext, MediaBackend, PlaybackEngine, PlaybackHandle};
use crate::resolver::{self, MediaStrategy, PlaybackPlan};
use crate::resources::{ResourceCounts, ResourceKind, ResourceLedger};
use crate::store::AttachmentStore;
use crate::timeline::AudioTimelineBuilder;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tkr_common::events::EventBus;
use tkr_common::models::TimelineItem;
use tkr_common::{Chapter, Session};
use tracing::{info, warn};

pub struct MediaService {
    cache: Arc<AttachmentCache>,
    ledger: ResourceLedger,
    events: EventBus,
    builder: AudioTimelineBuilder,
    backend: Arc<dyn MediaBackend>,
    config: MediaConfig,
}

impl MediaService {
    pub fn new(store: Arc<dyn AttachmentStore>, backend: Arc<dyn MediaBackend>, config: MediaConfig) -> Self {
        let cache = Arc::new(AttachmentCache::new(store, &config.cache));
        let ledger = ResourceLedger::new();
        let events = EventBus::new(config.playback.event_capacity);
        let builder = AudioTimelineBuilder::new(Arc::clone(&cache), ledger.clone(), config.timeline.clone());

        Self {
            cache,
            ledger,
            events,
            builder,
            backend,
            config,
        }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub fn resolve_media_strategy(&self, session: &Session) -> MediaStrategy {
        resolver::resolve(session)
    }

    /// Engine for `session` in `Idle`; the caller drives `load`
    pub fn create_engine(&self, session: &Session, strategy: MediaStrategy) -> PlaybackEngine {
        let plan = PlaybackPlan::from_session(session, strategy);
        PlaybackEngine::new(plan, self.engine_context())
    }

    fn engine_context(&self) -> EngineContext {
        EngineContext {
            cache: Arc::clone(&self.cache),
            builder: self.builder.clone(),
            backend: Arc::clone(&self.backend),
            ledger: self.ledger.clone(),
            events: self.events.clone(),
            config: self.config.playback.clone(),
        }
    }

    /// Open a session view
    ///
    /// A load failure leaves the handle in `error` with `retry_load`
    /// available; only a session with nothing to play is refused outright.
    pub async fn open_playback(&self, session: &Session, strategy: MediaStrategy) -> Result<PlaybackHandle> {
        if strategy == MediaStrategy::None {
            return Err(Error::NoPlayableMedia);
        }

        let mut engine = self.create_engine(session, strategy);
        info!(
            "Opening playback {} for session {} ({})",
            engine.id(),
            session.id,
            strategy
        );
        if let Err(e) = engine.load().await {
            warn!("Session {} opened in error state: {}", session.id, e);
        }

        Ok(PlaybackHandle::spawn(
            engine,
            ChapterIndex::new(session.chapters.clone()),
            self.events.clone(),
            self.config.playback.tick_interval(),
        ))
    }

    /// Partition timeline items by chapter; `chapters` need not be sorted
    pub fn group_timeline_items<T: TimelineItem>(
        &self,
        items: impl IntoIterator<Item = T>,
        chapters: &[Chapter],
        session_start: DateTime<Utc>,
    ) -> BTreeMap<ChapterGroupKey, Vec<T>> {
        if chapters::is_chapters_sorted(chapters) {
            chapters::group_items_by_chapter(items, chapters, session_start)
        } else {
            let sorted = chapters::sort_chapters_by_time(chapters.to_vec());
            chapters::group_items_by_chapter(items, &sorted, session_start)
        }
    }

    pub fn cache(&self) -> &Arc<AttachmentCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached attachment; later reads go back to the store
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn resource_counts(&self, kind: ResourceKind) -> ResourceCounts {
        self.ledger.counts(kind)
    }

    pub fn resource_totals(&self) -> ResourceCounts {
        self.ledger.totals()
    }

    /// Number of concatenated audio timelines built so far
    pub fn timelines_built(&self) -> usize {
        self.builder.build_count()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
