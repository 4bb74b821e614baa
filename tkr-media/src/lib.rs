//! # Taskerino Session Media Engine (tkr-media)
//!
//! Turns a recorded session (audio segments, video, chapters) into a
//! playable, seekable, synchronized presentation.
//!
//! **Pieces:**
//! - `store` / `cache`: content-addressed attachments behind a bounded LRU
//!   with one in-flight load per hash
//! - `timeline`: segment concatenation with silence, progressive loading
//! - `resolver`: playback strategy from a session's media fields
//! - `playback`: per-view engine, state machine, legacy drift correction
//! - `chapters`: binary-search chapter lookup and timeline grouping
//! - `service`: the facade the UI layer holds

pub mod cache;
pub mod chapters;
pub mod config;
pub mod error;
pub mod playback;
pub mod repository;
pub mod resolver;
pub mod resources;
pub mod service;
pub mod store;
pub mod timeline;

pub use cache::{AttachmentCache, CacheStats};
pub use chapters::{ChapterGroupKey, ChapterIndex};
pub use config::MediaConfig;
pub use error::{AttachmentError, Error, Result, SegmentLoadError};
pub use playback::{PlaybackEngine, PlaybackHandle, PlaybackState};
pub use repository::{JsonSessionRepository, SessionRepository};
pub use resolver::{MediaStrategy, PlaybackPlan};
pub use resources::{ResourceCounts, ResourceKind, ResourceLedger};
pub use service::MediaService;
pub use store::{Attachment, AttachmentStore, FsAttachmentStore, MemoryAttachmentStore};
pub use timeline::{AudioTimeline, AudioTimelineBuilder, TimelineLayout};
