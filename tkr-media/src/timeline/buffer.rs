//! Chained segment buffers
//!
//! One slot per timeline segment. A `Ready` slot owns a `SegmentBuffer`,
//! which holds the loaded payload plus the lease that accounts for it.
//! Dropping the buffer (eviction from the chain, dispose, timeline drop)
//! releases the lease exactly once.

use crate::error::SegmentLoadError;
use crate::resources::ResourceLease;
use crate::store::Attachment;
use std::sync::Arc;

/// Loaded payload of one segment
#[derive(Debug)]
pub struct SegmentBuffer {
    attachment: Arc<Attachment>,
    _lease: ResourceLease,
}

impl SegmentBuffer {
    pub fn new(attachment: Arc<Attachment>, lease: ResourceLease) -> Self {
        Self {
            attachment,
            _lease: lease,
        }
    }

    pub fn attachment(&self) -> &Arc<Attachment> {
        &self.attachment
    }

    pub fn size(&self) -> u64 {
        self.attachment.size()
    }
}

#[derive(Debug)]
pub enum SegmentState {
    /// Queued, not yet issued to the cache
    Pending,
    /// Load in flight
    Loading,
    Ready(SegmentBuffer),
    /// Load failed; playback skips this segment
    Failed(SegmentLoadError),
}

/// Owned-data view of a slot, for callers outside the chain lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentStatus {
    Pending,
    Loading,
    Ready,
    Failed(SegmentLoadError),
}

impl SegmentState {
    pub fn status(&self) -> SegmentStatus {
        match self {
            SegmentState::Pending => SegmentStatus::Pending,
            SegmentState::Loading => SegmentStatus::Loading,
            SegmentState::Ready(_) => SegmentStatus::Ready,
            SegmentState::Failed(e) => SegmentStatus::Failed(e.clone()),
        }
    }

    fn is_settled(&self) -> bool {
        matches!(self, SegmentState::Ready(_) | SegmentState::Failed(_))
    }
}

#[derive(Debug)]
pub struct SegmentChain {
    slots: Vec<SegmentState>,
}

impl SegmentChain {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| SegmentState::Pending).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<&SegmentState> {
        self.slots.get(index)
    }

    /// Pending → Loading. Returns false for any other state.
    pub fn mark_loading(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if matches!(slot, SegmentState::Pending) => {
                *slot = SegmentState::Loading;
                true
            }
            _ => false,
        }
    }

    /// Store a loaded buffer. A slot that already settled keeps its state and
    /// the new buffer is dropped (releasing its lease).
    pub fn fill(&mut self, index: usize, buffer: SegmentBuffer) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if !slot.is_settled() => {
                *slot = SegmentState::Ready(buffer);
                true
            }
            _ => false,
        }
    }

    pub fn fail(&mut self, index: usize, error: SegmentLoadError) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if !slot.is_settled() => {
                *slot = SegmentState::Failed(error);
                true
            }
            _ => false,
        }
    }

    /// Drop every held buffer and reset all slots to `Pending`
    ///
    /// Returns the number of buffers released.
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        for slot in &mut self.slots {
            if matches!(slot, SegmentState::Ready(_)) {
                released += 1;
            }
            *slot = SegmentState::Pending;
        }
        released
    }

    pub fn loaded_bytes(&self) -> u64 {
        self.slots
            .iter()
            .map(|slot| match slot {
                SegmentState::Ready(buffer) => buffer.size(),
                _ => 0,
            })
            .sum()
    }

    pub fn ready_count(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, SegmentState::Ready(_))).count()
    }

    pub fn failed_count(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, SegmentState::Failed(_))).count()
    }

    pub fn all_settled(&self) -> bool {
        self.slots.iter().all(SegmentState::is_settled)
    }
}
