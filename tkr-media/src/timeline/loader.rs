//! Progressive segment loading
//!
//! Segments beyond the startup prefix are loaded by one background task in
//! ascending offset order. `promote` moves a still-queued segment ahead of
//! all background work; the load already in flight is never interrupted.
//!
//! After `dispose` the task issues no new loads. A load that was in flight
//! still completes, but its result is discarded on arrival.

use super::buffer::{SegmentBuffer, SegmentChain, SegmentState};
use super::TimelineLayout;
use crate::cache::AttachmentCache;
use crate::error::{AttachmentError, SegmentLoadError};
use crate::resources::{ResourceKind, ResourceLedger};
use crate::store::Attachment;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Queued load with priority
#[derive(Debug, Clone)]
struct LoadRequest {
    index: usize,
    offset: f64,
    /// Promotion sequence number; later promotions run first
    promotion: Option<u64>,
    ticket: u64,
}

/// Promoted requests first (latest promotion wins), then lowest offset
impl Ord for LoadRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.promotion, other.promotion) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            // Reverse ordering so lower offsets pop first
            (None, None) => other
                .offset
                .total_cmp(&self.offset)
                .then_with(|| other.index.cmp(&self.index)),
        }
    }
}

impl PartialOrd for LoadRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LoadRequest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LoadRequest {}

/// Priority queue of segments not yet issued
///
/// Promotion pushes a fresh request; the superseded one stays in the heap
/// and is skipped when popped (its ticket no longer matches).
#[derive(Debug, Default)]
pub(crate) struct LoadQueue {
    heap: BinaryHeap<LoadRequest>,
    /// index → live ticket, for every segment still queued
    tickets: HashMap<usize, u64>,
    next_ticket: u64,
    next_promotion: u64,
}

impl LoadQueue {
    pub(crate) fn push(&mut self, index: usize, offset: f64) {
        let ticket = self.issue_ticket(index);
        self.heap.push(LoadRequest {
            index,
            offset,
            promotion: None,
            ticket,
        });
    }

    /// Move a queued segment to the front. False if it is not queued.
    pub(crate) fn promote(&mut self, index: usize, offset: f64) -> bool {
        if !self.tickets.contains_key(&index) {
            return false;
        }
        let ticket = self.issue_ticket(index);
        let promotion = self.next_promotion;
        self.next_promotion += 1;
        self.heap.push(LoadRequest {
            index,
            offset,
            promotion: Some(promotion),
            ticket,
        });
        true
    }

    pub(crate) fn pop(&mut self) -> Option<usize> {
        while let Some(request) = self.heap.pop() {
            if self.tickets.get(&request.index) == Some(&request.ticket) {
                self.tickets.remove(&request.index);
                return Some(request.index);
            }
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.tickets.len()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
        self.tickets.clear();
    }

    fn issue_ticket(&mut self, index: usize) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.tickets.insert(index, ticket);
        ticket
    }
}

/// Settled segment counts, published after every load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadProgress {
    pub total: usize,
    pub ready: usize,
    pub failed: usize,
}

impl LoadProgress {
    pub fn settled(&self) -> usize {
        self.ready + self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.settled() == self.total
    }
}

pub(crate) struct LoadState {
    pub(crate) chain: SegmentChain,
    pub(crate) queue: LoadQueue,
}

/// State shared between a timeline and its background loader
pub(crate) struct LoaderShared {
    pub(crate) layout: TimelineLayout,
    state: Mutex<LoadState>,
    pub(crate) cancel: CancellationToken,
    progress: watch::Sender<LoadProgress>,
    cache: Arc<AttachmentCache>,
    ledger: ResourceLedger,
}

impl LoaderShared {
    pub(crate) fn new(layout: TimelineLayout, cache: Arc<AttachmentCache>, ledger: ResourceLedger) -> Self {
        let total = layout.len();
        let (progress, _) = watch::channel(LoadProgress {
            total,
            ..Default::default()
        });
        Self {
            layout,
            state: Mutex::new(LoadState {
                chain: SegmentChain::new(total),
                queue: LoadQueue::default(),
            }),
            cancel: CancellationToken::new(),
            progress,
            cache,
            ledger,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LoadProgress> {
        self.progress.subscribe()
    }

    pub(crate) fn progress(&self) -> LoadProgress {
        *self.progress.borrow()
    }

    /// Load one segment through the cache and record the outcome
    pub(crate) async fn load_segment(&self, index: usize) {
        let Some(entry) = self.layout.entry(index) else {
            return;
        };
        trace!("Loading segment {} ({})", index, entry.segment.id);
        let result = self.cache.get(&entry.segment.hash).await;
        self.settle(index, result);
    }

    /// Record a finished load unless the timeline was disposed meanwhile
    fn settle(&self, index: usize, result: Result<Arc<Attachment>, AttachmentError>) {
        let mut state = self.lock();
        // Checked under the chain lock so dispose either sees this buffer
        // (and releases it) or this load sees the cancellation
        if self.cancel.is_cancelled() {
            debug!("Discarding segment {} load after dispose", index);
            return;
        }

        match result {
            Ok(attachment) => {
                let lease = self.ledger.acquire(ResourceKind::SegmentBuffer);
                state.chain.fill(index, SegmentBuffer::new(attachment, lease));
            }
            Err(cause) => {
                let segment_id = self
                    .layout
                    .entry(index)
                    .map(|e| e.segment.id.clone())
                    .unwrap_or_default();
                let error = SegmentLoadError {
                    segment_index: index,
                    segment_id,
                    cause,
                };
                warn!("{}", error);
                state.chain.fail(index, error);
            }
        }

        let progress = LoadProgress {
            total: state.chain.len(),
            ready: state.chain.ready_count(),
            failed: state.chain.failed_count(),
        };
        self.progress.send_replace(progress);
    }

    /// Next queued segment, marked loading in the same critical section
    fn next_request(&self) -> Option<usize> {
        let mut state = self.lock();
        if self.cancel.is_cancelled() {
            return None;
        }
        let index = state.queue.pop()?;
        state.chain.mark_loading(index);
        Some(index)
    }

    /// Move a pending segment to the front of the queue
    pub(crate) fn promote(&self, index: usize) -> bool {
        let Some(entry) = self.layout.entry(index) else {
            return false;
        };
        let mut state = self.lock();
        if !matches!(state.chain.state(index), Some(SegmentState::Pending)) {
            return false;
        }
        state.queue.promote(index, entry.offset)
    }

    /// Stop issuing loads and release every held buffer
    ///
    /// Returns the number of buffers released by this call.
    pub(crate) fn dispose(&self) -> usize {
        self.cancel.cancel();
        let mut state = self.lock();
        let queued = state.queue.len();
        if queued > 0 {
            debug!("Dropping {} queued segment loads", queued);
        }
        state.queue.clear();
        state.chain.release_all()
    }
}

/// Background loader: drains the queue one segment at a time
pub(crate) async fn run_loader(shared: Arc<LoaderShared>) {
    let mut loaded = 0usize;
    while let Some(index) = shared.next_request() {
        shared.load_segment(index).await;
        loaded += 1;
    }
    debug!(
        "Background loader finished ({} segments, cancelled: {})",
        loaded,
        shared.cancel.is_cancelled()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_pops_by_offset() {
        let mut queue = LoadQueue::default();
        queue.push(2, 20.0);
        queue.push(0, 0.0);
        queue.push(1, 10.0);

        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_promotion_jumps_queue_once() {
        let mut queue = LoadQueue::default();
        for i in 0..5 {
            queue.push(i, i as f64 * 10.0);
        }
        assert!(queue.promote(3, 30.0));
        assert!(queue.promote(4, 40.0));
        assert_eq!(queue.len(), 5);

        // Latest promotion first, then the earlier one, then offset order;
        // the superseded background requests for 3 and 4 are skipped
        let order: Vec<usize> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(order, vec![4, 3, 0, 1, 2]);
    }

    #[test]
    fn test_promote_unqueued_is_rejected() {
        let mut queue = LoadQueue::default();
        queue.push(0, 0.0);
        assert_eq!(queue.pop(), Some(0));
        assert!(!queue.promote(0, 0.0));
        assert!(!queue.promote(9, 90.0));
    }

    #[test]
    fn test_progress_completion() {
        let progress = LoadProgress {
            total: 3,
            ready: 2,
            failed: 1,
        };
        assert_eq!(progress.settled(), 3);
        assert!(progress.is_complete());
        assert!(!LoadProgress { total: 1, ..Default::default() }.is_complete());
    }
}
