use crate::callback::CallbackHandle;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cross-thread mailbox of callbacks pending for the owner thread.
///
/// The atomic counter mirrors the deque length at every quiescent point and
/// is read outside the lock, so the owner thread skips the drain phase
/// entirely when nothing is pending.
pub(crate) struct ExternalQueue {
    pending: AtomicUsize,
    entries: Mutex<VecDeque<CallbackHandle>>,
}

impl ExternalQueue {
    pub fn new() -> Self {
        Self {
            pending: AtomicUsize::new(0),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Pushes a callback, reporting whether it was the first to arrive
    /// since the last drain (the only case that needs a wakeup).
    ///
    /// Re-pushing the shared unit that is already the queue tail is
    /// skipped: the owner fires that exact object once anyway. This only
    /// coalesces immediate re-submissions of one live shared unit; owned
    /// boxes are never coalesced, and it is not a dedupe of the whole
    /// queue.
    pub fn push(&self, callback: CallbackHandle) -> bool {
        let mut entries = self.entries.lock();

        if let Some(tail) = entries.back() {
            if tail.is_same_shared(&callback) {
                return false;
            }
        }

        entries.push_back(callback);
        self.pending.fetch_add(1, Ordering::Release) == 0
    }

    pub fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    /// Swaps the whole queue out in one step. The entries belong to the
    /// caller until each one fires.
    pub fn drain(&self) -> VecDeque<CallbackHandle> {
        let mut entries = self.entries.lock();
        self.pending.store(0, Ordering::Release);
        mem::take(&mut *entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::EventCallback;
    use std::sync::Arc;

    struct Noop;

    impl EventCallback for Noop {
        fn fire(&self, _id: u64) {}
    }

    fn owned() -> CallbackHandle {
        CallbackHandle::Owned(Box::new(Noop))
    }

    #[test]
    fn first_push_since_drain_reports_wakeup() {
        let queue = ExternalQueue::new();

        assert!(queue.push(owned()));
        assert!(!queue.push(owned()));
        assert!(queue.has_pending());

        assert_eq!(queue.drain().len(), 2);
        assert!(!queue.has_pending());

        assert!(queue.push(owned()));
    }

    #[test]
    fn distinct_owned_zero_sized_units_both_queue() {
        let queue = ExternalQueue::new();

        // Zero-sized boxes share an address; they are still distinct work.
        assert!(queue.push(owned()));
        assert!(!queue.push(owned()));
        assert_eq!(queue.drain().len(), 2);
    }

    #[test]
    fn tail_resubmission_is_coalesced() {
        let queue = ExternalQueue::new();
        let unit: Arc<dyn EventCallback> = Arc::new(Noop);

        assert!(queue.push(CallbackHandle::Shared(unit.clone())));
        assert!(!queue.push(CallbackHandle::Shared(unit.clone())));
        assert!(!queue.push(owned()));
        // No longer the tail, so the same unit queues again.
        assert!(!queue.push(CallbackHandle::Shared(unit.clone())));

        assert_eq!(queue.drain().len(), 3);
    }
}
