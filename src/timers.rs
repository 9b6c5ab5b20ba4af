use crate::callback::CallbackHandle;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Pending timers ordered by `(expiry, id)`, with a side index from id to
/// expiry for cancellation.
///
/// Ids are assigned monotonically starting at 1 and never reused within a
/// center's lifetime, so the id doubles as the tie-break: timers with equal
/// expiries fire in creation order. Id 0 is reserved for non-timer
/// callbacks. Both structures always hold exactly the same set of timers.
pub(crate) struct TimerSet {
    next_id: u64,
    tree: BTreeMap<(Instant, u64), CallbackHandle>,
    index: HashMap<u64, Instant>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            tree: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn insert(&mut self, expiry: Instant, callback: CallbackHandle) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        self.tree.insert((expiry, id), callback);
        self.index.insert(id, expiry);
        id
    }

    /// Removes a pending timer. Ids that were never assigned, already
    /// fired, or already cancelled are a no-op returning false.
    pub fn cancel(&mut self, id: u64) -> bool {
        if id == 0 || id >= self.next_id {
            return false;
        }

        let expiry = match self.index.remove(&id) {
            Some(expiry) => expiry,
            None => return false,
        };

        let removed = self.tree.remove(&(expiry, id));
        debug_assert!(removed.is_some(), "timer {} missing from ordered set", id);
        true
    }

    pub fn earliest(&self) -> Option<Instant> {
        self.tree.keys().next().map(|&(expiry, _)| expiry)
    }

    /// Removes and returns the earliest timer if it was due at `now`.
    /// Timers becoming due after `now` was captured stay queued.
    pub fn pop_due(&mut self, now: Instant) -> Option<(u64, CallbackHandle)> {
        let &(expiry, _) = self.tree.keys().next()?;
        if expiry > now {
            return None;
        }

        let ((_, id), callback) = self.tree.pop_first()?;
        self.index.remove(&id);
        Some((id, callback))
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.tree.len(), self.index.len());
        self.tree.len()
    }

    pub fn clear(&mut self) {
        self.tree.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::EventCallback;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    struct Record(Arc<Mutex<Vec<u64>>>);

    impl EventCallback for Record {
        fn fire(&self, id: u64) {
            self.0.lock().push(id);
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<u64>>>) -> CallbackHandle {
        CallbackHandle::Owned(Box::new(Record(log.clone())))
    }

    #[test]
    fn ids_start_at_one_and_are_monotonic() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut timers = TimerSet::new();
        let now = Instant::now();

        assert_eq!(timers.insert(now, recorder(&log)), 1);
        assert_eq!(timers.insert(now, recorder(&log)), 2);
        timers.cancel(1);
        assert_eq!(timers.insert(now, recorder(&log)), 3);
    }

    #[test]
    fn equal_expiries_pop_in_creation_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut timers = TimerSet::new();
        let expiry = Instant::now();

        for _ in 0..3 {
            timers.insert(expiry, recorder(&log));
        }

        let now = expiry + Duration::from_millis(1);
        while let Some((id, callback)) = timers.pop_due(now) {
            callback.fire(id);
        }
        assert_eq!(*log.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn cancel_is_a_noop_for_dead_ids() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut timers = TimerSet::new();
        let now = Instant::now();

        let id = timers.insert(now, recorder(&log));
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert!(!timers.cancel(0));
        assert!(!timers.cancel(id + 100));
        assert_eq!(timers.len(), 0);

        // A fired id is dead too.
        let id = timers.insert(now, recorder(&log));
        assert!(timers.pop_due(now).is_some());
        assert!(!timers.cancel(id));
    }

    #[test]
    fn pop_due_defers_future_timers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut timers = TimerSet::new();
        let now = Instant::now();

        timers.insert(now + Duration::from_secs(60), recorder(&log));
        assert!(timers.pop_due(now).is_none());
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.earliest(), Some(now + Duration::from_secs(60)));
    }
}
