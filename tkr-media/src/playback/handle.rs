//! Playback handle
//!
//! The UI-facing wrapper around one `PlaybackEngine`. Owns the ticker task
//! that advances the engine's clocks at the configured interval, and the
//! chapter index of the session it plays.

use super::engine::PlaybackEngine;
use super::state::PlaybackState;
use crate::chapters::ChapterIndex;
use crate::error::{Error, Result};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tkr_common::events::{EventBus, MediaEvent};
use tkr_common::Chapter;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

pub struct PlaybackHandle {
    id: Uuid,
    engine: Arc<Mutex<PlaybackEngine>>,
    chapters: RwLock<ChapterIndex>,
    events: EventBus,
    ticker: CancellationToken,
}

impl PlaybackHandle {
    /// Wrap an engine and start its ticker
    pub fn spawn(
        engine: PlaybackEngine,
        chapters: ChapterIndex,
        events: EventBus,
        tick_interval: Duration,
    ) -> Self {
        let id = engine.id();
        let engine = Arc::new(Mutex::new(engine));
        let ticker = CancellationToken::new();

        let task_engine = Arc::clone(&engine);
        let task_token = ticker.clone();
        tokio::spawn(async move {
            let mut ticks = interval(tick_interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = Instant::now();

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticks.tick() => {
                        let now = Instant::now();
                        let elapsed = now.duration_since(last).as_secs_f64();
                        last = now;
                        task_engine.lock().await.tick(elapsed);
                    }
                }
            }
            debug!("Ticker for playback {} stopped", id);
        });

        Self {
            id,
            engine,
            chapters: RwLock::new(chapters),
            events,
            ticker,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn play(&self) -> Result<()> {
        self.engine.lock().await.play()
    }

    pub async fn pause(&self) -> Result<()> {
        self.engine.lock().await.pause()
    }

    pub async fn seek(&self, seconds: f64) -> Result<()> {
        self.engine.lock().await.seek(seconds)
    }

    pub async fn seek_to_chapter(&self, chapter: &Chapter) -> Result<()> {
        info!("Seeking playback {} to chapter '{}'", self.id, chapter.title);
        self.seek(chapter.start_time).await
    }

    /// Explicit retry after a load error
    ///
    /// The media is opened without holding the engine, so `dispose` is never
    /// kept waiting on it. A retry overtaken by `dispose` returns an error and
    /// its media is released as soon as the open completes.
    pub async fn retry_load(&self) -> Result<()> {
        let pending = self.engine.lock().await.begin_retry()?;
        let mut opening = tokio::spawn(pending.open());

        let opened = tokio::select! {
            joined = &mut opening => joined
                .map_err(|e| Error::InvalidState(format!("load task failed: {}", e)))?,
            _ = self.ticker.cancelled() => {
                debug!("Playback {} disposed while retrying", self.id);
                return Err(Error::InvalidState("playback was disposed during load".into()));
            }
        };
        self.engine.lock().await.finish_load(opened)
    }

    pub async fn state(&self) -> PlaybackState {
        self.engine.lock().await.state()
    }

    pub async fn on_time_update(&self, callback: impl FnMut(&PlaybackState) + Send + 'static) {
        self.engine.lock().await.on_time_update(callback);
    }

    /// Chapter containing `seconds` in this view's session
    pub fn chapter_at(&self, seconds: f64) -> Option<Chapter> {
        self.chapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .chapter_at(seconds)
            .cloned()
    }

    /// This view's chapters, sorted by start time
    pub fn chapters(&self) -> Vec<Chapter> {
        self.chapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .chapters()
            .to_vec()
    }

    /// Replace this view's chapter list (after chapters are regenerated)
    pub fn set_chapters(&self, chapters: Vec<Chapter>) {
        self.chapters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(chapters);
    }

    /// Media events from every playback on the bus; filter on `playback_id()`
    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    /// Stop the ticker and release every media resource
    pub async fn dispose(&self) {
        self.ticker.cancel();
        self.engine.lock().await.dispose();
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        // The ticker task holds the last other reference to the engine; once
        // it exits the engine drops and disposes itself
        self.ticker.cancel();
    }
}
