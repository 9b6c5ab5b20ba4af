use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// A unit of deferred work executed on the owning thread of a
/// [`Center`](crate::Center).
///
/// Timer callbacks are fired with the id returned by
/// [`create_timer`](crate::Center::create_timer); externally submitted
/// callbacks are fired with id 0. A unit fires at most once per submission,
/// always on the owner thread, never concurrently with another fire from
/// the same center.
pub trait EventCallback: Send + Sync {
    fn fire(&self, id: u64);
}

/// Owning wrapper around a callback unit.
///
/// `Owned` units are freed when the handle drops. `Shared` units are kept
/// alive by every other strong reference, typically a submitter blocked
/// until the unit has fired; dropping the handle then frees nothing the
/// submitter still needs. A moved-from handle holds nothing, so the
/// exactly-one-owner invariant comes from move semantics alone.
pub enum CallbackHandle {
    Owned(Box<dyn EventCallback>),
    Shared(Arc<dyn EventCallback>),
}

impl CallbackHandle {
    pub fn fire(&self, id: u64) {
        match self {
            Self::Owned(callback) => callback.fire(id),
            Self::Shared(callback) => callback.fire(id),
        }
    }

    /// Whether both handles refer to the same live shared unit.
    ///
    /// Only `Shared` handles can alias. Owned boxes are unique by
    /// construction, and zero-sized ones share a dangling address without
    /// being the same submission, so they never compare equal here.
    pub(crate) fn is_same_shared(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Shared(a), Self::Shared(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

/// One-shot closure adapter. The mutex exists only to move the `FnOnce`
/// out through a shared reference.
pub(crate) struct ClosureCall<F>(Mutex<Option<F>>);

impl<F: FnOnce() + Send> ClosureCall<F> {
    pub fn new(f: F) -> Self {
        Self(Mutex::new(Some(f)))
    }
}

impl<F: FnOnce() + Send> EventCallback for ClosureCall<F> {
    fn fire(&self, _id: u64) {
        if let Some(f) = self.0.lock().take() {
            f();
        }
    }
}

/// Completion gate for synchronous cross-thread submission: the submitter
/// blocks in [`wait`](SubmitGate::wait) until the owner thread has fired
/// the wrapped unit.
pub(crate) struct SubmitGate {
    inner: CallbackHandle,
    done: Mutex<bool>,
    cond: Condvar,
}

impl SubmitGate {
    pub fn new(inner: CallbackHandle) -> Self {
        Self {
            inner,
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }
}

impl EventCallback for SubmitGate {
    fn fire(&self, id: u64) {
        self.inner.fire(id);

        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }
}
