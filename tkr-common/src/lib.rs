//! # Taskerino Common Library
//!
//! Shared code for the Taskerino session media crates:
//! - Session, audio segment, video and chapter records
//! - Media event types and the broadcast EventBus
//! - Root folder resolution and TOML bootstrap configuration
//! - Timestamp and playback-time formatting helpers

pub mod config;
pub mod error;
pub mod events;
pub mod human_time;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use models::{
    AudioSegment, Chapter, ContentHash, ScreenshotEvent, Session, SessionStatus, SessionSummary,
    VideoChunk, VideoDescriptor,
};
