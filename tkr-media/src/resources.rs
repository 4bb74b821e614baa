//! Resource ledger for decode buffers and media bindings
//!
//! Every temporary resource the engine holds (a loaded segment buffer, a
//! binding to a backend media element) is represented by a `ResourceLease`.
//! Creating a lease counts an acquire; dropping it counts a release. A lease
//! cannot be cloned, so each acquire is matched by exactly one release no
//! matter which path (dispose, session switch, error, panic unwind) drops it.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Kind of tracked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    /// Loaded audio segment payload held by a timeline
    SegmentBuffer,
    /// Media element opened on a backend
    MediaBinding,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::SegmentBuffer => write!(f, "segment-buffer"),
            ResourceKind::MediaBinding => write!(f, "media-binding"),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
}

#[derive(Debug, Default)]
struct LedgerInner {
    segment_buffers: Counters,
    media_bindings: Counters,
}

impl LedgerInner {
    fn counters(&self, kind: ResourceKind) -> &Counters {
        match kind {
            ResourceKind::SegmentBuffer => &self.segment_buffers,
            ResourceKind::MediaBinding => &self.media_bindings,
        }
    }
}

/// Acquire/release totals at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCounts {
    pub acquired: u64,
    pub released: u64,
}

impl ResourceCounts {
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Shared acquire/release ledger
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    inner: Arc<LedgerInner>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an acquire and return the lease that will record its release
    pub fn acquire(&self, kind: ResourceKind) -> ResourceLease {
        self.inner.counters(kind).acquired.fetch_add(1, Ordering::SeqCst);
        trace!("acquire {}", kind);
        ResourceLease {
            ledger: Arc::clone(&self.inner),
            kind,
        }
    }

    pub fn counts(&self, kind: ResourceKind) -> ResourceCounts {
        let counters = self.inner.counters(kind);
        ResourceCounts {
            acquired: counters.acquired.load(Ordering::SeqCst),
            released: counters.released.load(Ordering::SeqCst),
        }
    }

    /// Totals across all kinds
    pub fn totals(&self) -> ResourceCounts {
        let buffers = self.counts(ResourceKind::SegmentBuffer);
        let bindings = self.counts(ResourceKind::MediaBinding);
        ResourceCounts {
            acquired: buffers.acquired + bindings.acquired,
            released: buffers.released + bindings.released,
        }
    }
}

/// Proof of one acquired resource; releases it on drop
#[derive(Debug)]
pub struct ResourceLease {
    ledger: Arc<LedgerInner>,
    kind: ResourceKind,
}

impl ResourceLease {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.ledger.counters(self.kind).released.fetch_add(1, Ordering::SeqCst);
        trace!("release {}", self.kind);
    }
}
