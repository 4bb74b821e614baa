//! Playback sync engine and its media handles

pub mod concat;
pub mod drift;
pub mod element;
pub mod engine;
pub mod handle;
pub mod state;

pub use concat::{ConcatAudioSource, SkipNotice};
pub use drift::{DriftCorrector, DriftDecision, DriftPolicy};
pub use element::{MediaBackend, MediaElement, MediaKind, MediaSource, VirtualBackend, VirtualElement};
pub use engine::{EngineContext, OpenedMedia, PendingLoad, PlaybackEngine};
pub use handle::PlaybackHandle;
pub use state::{can_transition, PlaybackState, StatusMachine};
