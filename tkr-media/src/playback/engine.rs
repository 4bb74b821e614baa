//! Playback sync engine
//!
//! Drives the media handles for one open session view through the status
//! machine in `state`. One engine per view; nothing here is shared.
//!
//! **Drivers:**
//! - `Optimized`: one element playing the pre-merged file. No follower and
//!   no drift state exist in this variant.
//! - `AudioOnly`: the concatenated audio source alone.
//! - `Legacy`: video element as master clock, concatenated audio as
//!   follower. User commands hit the master first, then the follower. Each
//!   tick measures drift and lets the `DriftCorrector` decide on a one-shot
//!   correction.
//!
//! **Teardown:** `dispose` (or drop) releases every element binding and
//! timeline buffer exactly once, through the leases they hold.

use super::concat::ConcatAudioSource;
use super::drift::{DriftCorrector, DriftDecision, DriftPolicy};
use super::element::{MediaBackend, MediaElement, MediaKind, MediaSource};
use super::state::{PlaybackState, StatusMachine};
use crate::cache::AttachmentCache;
use crate::config::PlaybackConfig;
use crate::error::{Error, Result};
use crate::resolver::PlaybackPlan;
use crate::resources::{ResourceKind, ResourceLease, ResourceLedger};
use crate::timeline::AudioTimelineBuilder;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tkr_common::events::{EventBus, MediaEvent, PlaybackMode, PlaybackStatus};
use tkr_common::{AudioSegment, ContentHash, VideoChunk};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Collaborators shared by every engine a service opens
#[derive(Clone)]
pub struct EngineContext {
    pub cache: Arc<AttachmentCache>,
    pub builder: AudioTimelineBuilder,
    pub backend: Arc<dyn MediaBackend>,
    pub ledger: ResourceLedger,
    pub events: EventBus,
    pub config: PlaybackConfig,
}

impl EngineContext {
    async fn open(&self, plan: &PlaybackPlan) -> Result<Driver> {
        match plan {
            PlaybackPlan::None => Err(Error::NoPlayableMedia),
            PlaybackPlan::OptimizedFile { path, duration_hint } => {
                self.open_optimized(path, *duration_hint).await
            }
            PlaybackPlan::AudioOnly {
                session_start,
                segments,
            } => {
                let audio = self.open_audio(*session_start, segments).await?;
                Ok(Driver::AudioOnly { audio })
            }
            PlaybackPlan::LegacySync {
                session_start,
                raw_path,
                chunks,
                duration_hint,
                segments,
            } => {
                self.open_legacy(*session_start, raw_path.as_ref(), chunks, *duration_hint, segments)
                    .await
            }
        }
    }

    async fn open_optimized(&self, path: &ContentHash, duration_hint: Option<f64>) -> Result<Driver> {
        let primary = self.cache.get(path).await?;
        let kind = if primary.is_audio() {
            MediaKind::Audio
        } else {
            MediaKind::Video
        };
        let element = self
            .backend
            .open(MediaSource {
                kind,
                primary,
                parts: Vec::new(),
                duration_hint,
            })
            .await?;
        Ok(Driver::Optimized {
            element,
            _binding: self.ledger.acquire(ResourceKind::MediaBinding),
        })
    }

    async fn open_audio(&self, session_start: DateTime<Utc>, segments: &[AudioSegment]) -> Result<ConcatAudioSource> {
        let timeline = self.builder.build_from(session_start, segments).await;
        let progress = timeline.progress();
        if progress.is_complete() && progress.ready == 0 {
            return Err(Error::MediaUnsupportedOrCorrupt(format!(
                "none of {} audio segments could be loaded",
                progress.total
            )));
        }
        Ok(ConcatAudioSource::new(timeline))
    }

    async fn open_legacy(
        &self,
        session_start: DateTime<Utc>,
        raw_path: Option<&ContentHash>,
        chunks: &[VideoChunk],
        duration_hint: Option<f64>,
        segments: &[AudioSegment],
    ) -> Result<Driver> {
        let mut attachments = Vec::with_capacity(chunks.len() + 1);
        if let Some(raw) = raw_path {
            attachments.push(self.cache.get(raw).await?);
        }
        let loaded = futures::future::join_all(chunks.iter().map(|c| self.cache.get(&c.hash))).await;
        for chunk in loaded {
            attachments.push(chunk?);
        }

        let mut attachments = attachments.into_iter();
        let primary = attachments.next().ok_or_else(|| {
            Error::MediaUnsupportedOrCorrupt("legacy video has no recording or chunks".into())
        })?;
        let chunk_end = chunks
            .iter()
            .map(|c| c.start_time + c.duration)
            .fold(None, |acc: Option<f64>, end| Some(acc.map_or(end, |a| a.max(end))));

        let video = self
            .backend
            .open(MediaSource {
                kind: MediaKind::Video,
                primary,
                parts: attachments.collect(),
                duration_hint: duration_hint.or(chunk_end),
            })
            .await?;
        let binding = self.ledger.acquire(ResourceKind::MediaBinding);

        let audio = if segments.is_empty() {
            None
        } else {
            Some(self.open_audio(session_start, segments).await?)
        };

        Ok(Driver::Legacy {
            video,
            _binding: binding,
            audio,
            corrector: DriftCorrector::new(DriftPolicy::from(&self.config)),
        })
    }
}

/// Media opening work detached from its engine
pub struct PendingLoad {
    ctx: EngineContext,
    plan: PlaybackPlan,
}

impl PendingLoad {
    pub async fn open(self) -> OpenedMedia {
        OpenedMedia(self.ctx.open(&self.plan).await)
    }
}

/// Result of a `PendingLoad`, installed with `PlaybackEngine::finish_load`
pub struct OpenedMedia(Result<Driver>);

type TimeUpdateCallback = Box<dyn FnMut(&PlaybackState) + Send>;

enum Driver {
    Optimized {
        element: Box<dyn MediaElement>,
        _binding: ResourceLease,
    },
    AudioOnly {
        audio: ConcatAudioSource,
    },
    Legacy {
        video: Box<dyn MediaElement>,
        _binding: ResourceLease,
        audio: Option<ConcatAudioSource>,
        corrector: DriftCorrector,
    },
}

impl Driver {
    fn master(&self) -> &dyn MediaElement {
        match self {
            Driver::Optimized { element, .. } => element.as_ref(),
            Driver::AudioOnly { audio } => audio,
            Driver::Legacy { video, .. } => video.as_ref(),
        }
    }

    fn play(&mut self) {
        match self {
            Driver::Optimized { element, .. } => element.play(),
            Driver::AudioOnly { audio } => audio.play(),
            Driver::Legacy { video, audio, .. } => {
                video.play();
                if let Some(audio) = audio {
                    audio.play();
                }
            }
        }
    }

    fn pause(&mut self) {
        match self {
            Driver::Optimized { element, .. } => element.pause(),
            Driver::AudioOnly { audio } => audio.pause(),
            Driver::Legacy { video, audio, .. } => {
                video.pause();
                if let Some(audio) = audio {
                    audio.pause();
                }
            }
        }
    }

    fn seek(&mut self, seconds: f64) {
        match self {
            Driver::Optimized { element, .. } => element.seek(seconds),
            Driver::AudioOnly { audio } => audio.seek(seconds),
            Driver::Legacy {
                video,
                audio,
                corrector,
                ..
            } => {
                video.seek(seconds);
                if let Some(audio) = audio {
                    audio.seek(video.current_time());
                }
                corrector.reset();
            }
        }
    }

    /// Follower audio is waiting on a segment load
    fn is_buffering(&self) -> bool {
        match self {
            Driver::Optimized { .. } => false,
            Driver::AudioOnly { audio } => audio.is_buffering(),
            Driver::Legacy { audio, .. } => audio.as_ref().is_some_and(ConcatAudioSource::is_buffering),
        }
    }
}

/// Drift between master and follower, while both still cover the position
fn measure_drift(video: &dyn MediaElement, audio: &ConcatAudioSource) -> Option<f64> {
    let master = video.current_time();
    if master >= audio.duration() {
        return None;
    }
    Some((audio.current_time() - master).abs())
}

pub struct PlaybackEngine {
    id: Uuid,
    plan: PlaybackPlan,
    ctx: EngineContext,
    machine: StatusMachine,
    driver: Option<Driver>,
    error: Option<String>,
    last_drift: Option<f64>,
    callbacks: Vec<TimeUpdateCallback>,
    disposed: bool,
}

impl PlaybackEngine {
    pub fn new(plan: PlaybackPlan, ctx: EngineContext) -> Self {
        let id = Uuid::new_v4();
        debug!("Created playback engine {} ({})", id, plan.mode());
        Self {
            id,
            plan,
            ctx,
            machine: StatusMachine::new(),
            driver: None,
            error: None,
            last_drift: None,
            callbacks: Vec::new(),
            disposed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> PlaybackMode {
        self.plan.mode()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.machine.status()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn state(&self) -> PlaybackState {
        let (current_time, duration, is_playing) = match &self.driver {
            Some(driver) => {
                let master = driver.master();
                (master.current_time(), master.duration(), master.is_playing())
            }
            None => (0.0, 0.0, false),
        };
        PlaybackState {
            playback_id: self.id,
            mode: self.mode(),
            status: self.status(),
            current_time,
            duration,
            is_playing,
            drift: match self.driver {
                Some(Driver::Legacy { .. }) => self.last_drift,
                _ => None,
            },
            error: self.error.clone(),
        }
    }

    /// Register a callback run after every tick with the current state
    pub fn on_time_update(&mut self, callback: impl FnMut(&PlaybackState) + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    fn set_status(&mut self, to: PlaybackStatus) -> Result<()> {
        let old = self.machine.transition(to)?;
        if old != to {
            debug!("Playback {}: {} -> {}", self.id, old, to);
            self.ctx.events.emit_lossy(MediaEvent::StateChanged {
                playback_id: self.id,
                old_state: old,
                new_state: to,
                timestamp: tkr_common::time::now(),
            });
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::InvalidState("playback has been disposed".into()));
        }
        Ok(())
    }

    /// Open the media for this engine's plan
    ///
    /// On failure the engine is left in `error` with a readable reason; it
    /// does not retry on its own.
    pub async fn load(&mut self) -> Result<()> {
        let pending = self.begin_load()?;
        let opened = pending.open().await;
        self.finish_load(opened)
    }

    /// Enter `loading` and hand out the work of opening the media
    ///
    /// The returned `PendingLoad` borrows nothing from the engine, so the
    /// caller can run it without holding the engine.
    pub fn begin_load(&mut self) -> Result<PendingLoad> {
        self.ensure_live()?;
        self.set_status(PlaybackStatus::Loading)?;
        // A retry replaces whatever the failed attempt left behind
        self.driver = None;
        self.last_drift = None;
        Ok(PendingLoad {
            ctx: self.ctx.clone(),
            plan: self.plan.clone(),
        })
    }

    /// `begin_load` for an explicit retry; only valid from `error`
    pub fn begin_retry(&mut self) -> Result<PendingLoad> {
        if self.status() != PlaybackStatus::Error {
            return Err(Error::InvalidState(format!(
                "retry is only possible from error, not {}",
                self.status()
            )));
        }
        info!("Retrying load for playback {}", self.id);
        self.begin_load()
    }

    /// Install the outcome of a `PendingLoad`
    ///
    /// Media opened for an engine disposed in the meantime is dropped here,
    /// which releases its resources.
    pub fn finish_load(&mut self, opened: OpenedMedia) -> Result<()> {
        if self.disposed {
            debug!("Playback {} disposed during load, discarding media", self.id);
            return Err(Error::InvalidState("playback was disposed during load".into()));
        }
        if self.status() != PlaybackStatus::Loading {
            return Err(Error::InvalidState(format!(
                "no load in progress ({})",
                self.status()
            )));
        }

        match opened.0 {
            Ok(driver) => {
                self.driver = Some(driver);
                self.error = None;
                self.set_status(PlaybackStatus::Ready)?;
                let state = self.state();
                info!(
                    "Playback {} ready: {} ({:.1}s)",
                    self.id, state.mode, state.duration
                );
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("Playback {} failed to load: {}", self.id, reason);
                self.error = Some(reason.clone());
                self.ctx.events.emit_lossy(MediaEvent::PlaybackError {
                    playback_id: self.id,
                    reason,
                });
                self.set_status(PlaybackStatus::Error)?;
                Err(e)
            }
        }
    }

    /// Explicit retry after a load error
    pub async fn retry_load(&mut self) -> Result<()> {
        let pending = self.begin_retry()?;
        let opened = pending.open().await;
        self.finish_load(opened)
    }

    /// Start playback; valid from `ready` or `paused`
    ///
    /// During a seek this only changes where the seek settles.
    pub fn play(&mut self) -> Result<()> {
        self.ensure_live()?;
        match self.status() {
            PlaybackStatus::Seeking => {
                self.machine.set_resume_target(PlaybackStatus::Playing);
                Ok(())
            }
            PlaybackStatus::Ready | PlaybackStatus::Paused => {
                self.set_status(PlaybackStatus::Playing)?;
                if let Some(driver) = &mut self.driver {
                    driver.play();
                }
                Ok(())
            }
            other => Err(Error::InvalidState(format!("cannot play while {}", other))),
        }
    }

    /// Pause playback; valid from `playing`
    pub fn pause(&mut self) -> Result<()> {
        self.ensure_live()?;
        match self.status() {
            PlaybackStatus::Seeking => {
                if self.machine.resume_target() == PlaybackStatus::Playing {
                    self.machine.set_resume_target(PlaybackStatus::Paused);
                }
                Ok(())
            }
            PlaybackStatus::Playing => {
                if let Some(driver) = &mut self.driver {
                    driver.pause();
                }
                self.set_status(PlaybackStatus::Paused)
            }
            other => Err(Error::InvalidState(format!("cannot pause while {}", other))),
        }
    }

    /// Move to `seconds` (clamped to the media duration)
    ///
    /// Stays in `seeking` while the follower waits on a segment load, then
    /// settles into the state the seek started from.
    pub fn seek(&mut self, seconds: f64) -> Result<()> {
        self.ensure_live()?;
        let resume = match self.status() {
            PlaybackStatus::Playing => PlaybackStatus::Playing,
            PlaybackStatus::Paused | PlaybackStatus::Ended => PlaybackStatus::Paused,
            PlaybackStatus::Ready => PlaybackStatus::Ready,
            PlaybackStatus::Seeking => self.machine.resume_target(),
            other => return Err(Error::InvalidState(format!("cannot seek while {}", other))),
        };
        let Some(driver) = &mut self.driver else {
            return Err(Error::InvalidState("no media loaded".into()));
        };

        driver.pause();
        driver.seek(seconds);
        debug!("Playback {} seeking to {:.2}s", self.id, driver.master().current_time());
        self.machine.set_resume_target(resume);
        self.set_status(PlaybackStatus::Seeking)?;
        self.finish_seek()
    }

    /// Settle a pending seek once nothing is buffering
    fn finish_seek(&mut self) -> Result<()> {
        let Some(driver) = &mut self.driver else {
            return Ok(());
        };
        if driver.is_buffering() {
            return Ok(());
        }

        if driver.master().is_ended() {
            return self.reach_end();
        }
        let resume = self.machine.resume_target();
        if resume == PlaybackStatus::Playing {
            driver.play();
        }
        self.set_status(resume)
    }

    fn reach_end(&mut self) -> Result<()> {
        let position = match &mut self.driver {
            Some(driver) => {
                driver.pause();
                driver.master().current_time()
            }
            None => 0.0,
        };
        info!("Playback {} ended at {:.2}s", self.id, position);
        self.set_status(PlaybackStatus::Ended)?;
        self.ctx.events.emit_lossy(MediaEvent::PlaybackEnded {
            playback_id: self.id,
            position,
        });
        Ok(())
    }

    /// Advance the clocks by `elapsed` seconds of wall time
    ///
    /// Called periodically by the handle's ticker. Runs the drift check in
    /// legacy mode, reports skipped segments, detects the natural end and
    /// publishes a time update.
    pub fn tick(&mut self, elapsed: f64) {
        if self.disposed || self.driver.is_none() {
            return;
        }

        let result = match self.status() {
            PlaybackStatus::Seeking => self.finish_seek(),
            PlaybackStatus::Playing => self.advance(elapsed),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("Playback {} tick failed: {}", self.id, e);
        }

        let state = self.state();
        self.ctx.events.emit_lossy(MediaEvent::TimeUpdate {
            playback_id: self.id,
            current_time: state.current_time,
            duration: state.duration,
            is_playing: state.is_playing,
            drift: state.drift,
        });
        for callback in &mut self.callbacks {
            callback(&state);
        }
    }

    fn advance(&mut self, elapsed: f64) -> Result<()> {
        let id = self.id;
        let mut skips = Vec::new();
        let mut drift_events = Vec::new();

        let Some(driver) = &mut self.driver else {
            return Ok(());
        };
        match driver {
            Driver::Optimized { element, .. } => element.advance(elapsed),
            Driver::AudioOnly { audio } => {
                audio.advance(elapsed);
                skips = audio.take_skips();
            }
            Driver::Legacy {
                video,
                audio,
                corrector,
                ..
            } => {
                video.advance(elapsed);
                if let Some(audio) = audio {
                    audio.advance(elapsed);
                    skips = audio.take_skips();

                    let drift = measure_drift(video.as_ref(), audio);
                    self.last_drift = drift;
                    if let Some(drift) = drift {
                        if let DriftDecision::Correct {
                            consecutive,
                            unrecoverable,
                        } = corrector.check(drift)
                        {
                            let target = video.current_time();
                            audio.seek(target);
                            if video.is_playing() {
                                audio.play();
                            }
                            debug!("Corrected {:.3}s drift, audio now at {:.2}s", drift, target);
                            drift_events.push(MediaEvent::DriftCorrected {
                                playback_id: id,
                                drift,
                                corrected_to: target,
                            });
                            if unrecoverable {
                                drift_events.push(MediaEvent::DriftUnrecoverable {
                                    playback_id: id,
                                    drift,
                                    corrections: consecutive,
                                });
                            }
                            self.last_drift = measure_drift(video.as_ref(), audio);
                        }
                    }
                }
            }
        }
        let ended = driver.master().is_ended();

        for skip in skips {
            self.ctx.events.emit_lossy(MediaEvent::SegmentSkipped {
                playback_id: id,
                segment_index: skip.segment_index,
                segment_id: skip.segment_id,
                reason: skip.reason,
                resumed_at: skip.resumed_at,
            });
        }
        for event in drift_events {
            self.ctx.events.emit_lossy(event);
        }

        if ended {
            self.reach_end()?;
        }
        Ok(())
    }

    /// Release every handle and buffer; idempotent
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(driver) = self.driver.take() {
            match &driver {
                Driver::AudioOnly { audio } => audio.dispose(),
                Driver::Legacy { audio: Some(audio), .. } => audio.dispose(),
                _ => {}
            }
        }
        self.callbacks.clear();
        if let Err(e) = self.set_status(PlaybackStatus::Idle) {
            warn!("Playback {} dispose: {}", self.id, e);
        }
        debug!("Playback {} disposed", self.id);
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}
