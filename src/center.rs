use crate::callback::{CallbackHandle, ClosureCall, SubmitGate};
use crate::driver::{Driver, DriverWaker, FiredEvent, Readiness};
use crate::external::ExternalQueue;
use crate::timers::TimerSet;
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Recoverable failures from [`Center::own`].
#[derive(Debug, Error)]
pub enum OwnError {
    #[error("center is already owned by thread {0:?}")]
    AlreadyOwned(ThreadId),
    #[error("driver initialization failed")]
    Init(#[source] io::Error),
    #[error("driver activation failed")]
    Activate(#[source] io::Error),
}

/// State reached only from the owner thread.
struct Local {
    driver: Box<dyn Driver>,
    timers: TimerSet,
    fired: Vec<FiredEvent>,
    wait_error: Option<io::Error>,
    initialized: bool,
    hint_capacity: usize,
}

/// Single-owner-thread event reactor.
///
/// A center is constructed unowned. One thread binds itself with
/// [`own`](Center::own) and from then on is the only thread allowed to run
/// [`run_once`](Center::run_once), create or cancel timers, and touch the
/// driver. Any thread may hand the owner work through
/// [`submit`](Center::submit). [`disown`](Center::disown) releases the
/// binding; the center may then be owned again, by any thread.
pub struct Center {
    owner: Mutex<Option<ThreadId>>,
    external: ExternalQueue,
    waker: Mutex<Option<Arc<dyn DriverWaker>>>,
    needs_wakeup: AtomicBool,
    local: UnsafeCell<Local>,
}

// `local` is only reached through `local_mut`, whose callers have passed
// the owner-thread assertion, and no `Local` borrow is held while a
// callback fires.
unsafe impl Sync for Center {}

impl Center {
    pub fn new(driver: Box<dyn Driver>) -> Self {
        Self::with_capacity(driver, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(driver: Box<dyn Driver>, hint_capacity: usize) -> Self {
        Self {
            owner: Mutex::new(None),
            external: ExternalQueue::new(),
            waker: Mutex::new(None),
            needs_wakeup: AtomicBool::new(true),
            local: UnsafeCell::new(Local {
                driver,
                timers: TimerSet::new(),
                fired: Vec::new(),
                wait_error: None,
                initialized: false,
                hint_capacity,
            }),
        }
    }

    /// Binds the calling thread as owner and activates the driver. Driver
    /// `init` runs only on the first successful own; the activation hook
    /// runs on every own.
    pub fn own(&self) -> Result<(), OwnError> {
        let current = thread::current().id();
        {
            let mut owner = self.owner.lock();
            if let Some(existing) = *owner {
                return Err(OwnError::AlreadyOwned(existing));
            }
            *owner = Some(current);
        }

        // Owner context from here on; roll the binding back on failure.
        let local = unsafe { self.local_mut() };
        if !local.initialized {
            if let Err(err) = local.driver.init(local.hint_capacity) {
                *self.owner.lock() = None;
                return Err(OwnError::Init(err));
            }
            local.initialized = true;
        }
        if let Err(err) = local.driver.on_activate() {
            *self.owner.lock() = None;
            return Err(OwnError::Activate(err));
        }

        *self.waker.lock() = Some(local.driver.waker());
        self.needs_wakeup
            .store(local.driver.needs_wakeup(), Ordering::Relaxed);

        tracing::debug!(owner = ?current, "center owned");
        Ok(())
    }

    /// Deactivates the driver, fires every still-queued external callback
    /// with id 0, discards pending timers without firing them, and releases
    /// ownership.
    pub fn disown(&self) {
        self.assert_owner("disown");

        unsafe { self.local_mut() }.driver.on_deactivate();
        *self.waker.lock() = None;

        // Queued work is flushed, never silently dropped. Submissions
        // racing with shutdown stay queued for the next owner.
        let mut flushed = 0usize;
        loop {
            let batch = self.external.drain();
            if batch.is_empty() {
                break;
            }
            for callback in batch {
                callback.fire(0);
                flushed += 1;
            }
        }

        let discarded = {
            let local = unsafe { self.local_mut() };
            let discarded = local.timers.len();
            local.timers.clear();
            discarded
        };

        tracing::debug!(flushed, discarded_timers = discarded, "center disowned");
        *self.owner.lock() = None;
    }

    pub fn in_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    pub fn owner(&self) -> Option<ThreadId> {
        *self.owner.lock()
    }

    /// Schedules `callback` to fire once, `delay` from now. Owner thread
    /// only. Timers with equal expiries fire in creation order.
    pub fn create_timer(&self, delay: Duration, callback: CallbackHandle) -> u64 {
        self.assert_owner("create_timer");
        let expiry = Instant::now() + delay;
        unsafe { self.local_mut() }.timers.insert(expiry, callback)
    }

    /// Cancels a pending timer. Owner thread only. Returns false for id 0
    /// and for ids never assigned, already fired, or already cancelled.
    pub fn cancel_timer(&self, id: u64) -> bool {
        self.assert_owner("cancel_timer");
        unsafe { self.local_mut() }.timers.cancel(id)
    }

    /// Runs one loop iteration: waits on the driver for up to `timeout`
    /// (clamped to the earliest pending timer), fires timers that came due
    /// in expiry order, then drains one batch of external submissions.
    /// Returns the total number of events handled.
    ///
    /// External callbacks enqueued while the batch fires are only picked
    /// up by the next call, which bounds the work done per iteration.
    pub fn run_once(&self, timeout: Duration) -> usize {
        self.assert_owner("run_once");

        let (wait_for, timers_armed) = {
            let local = unsafe { self.local_mut() };
            match local.timers.earliest() {
                Some(earliest) => {
                    let until = earliest.saturating_duration_since(Instant::now());
                    if until <= timeout {
                        (until, true)
                    } else {
                        (timeout, false)
                    }
                }
                None => (timeout, false),
            }
        };

        let n_io = {
            let local = unsafe { self.local_mut() };
            local.fired.clear();
            match local.driver.wait(&mut local.fired, Some(wait_for)) {
                Ok(count) => {
                    local.wait_error = None;
                    count
                }
                Err(err) => {
                    tracing::warn!(error = %err, "driver wait failed");
                    local.wait_error = Some(err);
                    0
                }
            }
        };

        let mut n_timer = 0;
        if timers_armed {
            // One clock snapshot: timers becoming due while this batch
            // fires wait for the next call.
            let now = Instant::now();
            loop {
                let due = unsafe { self.local_mut() }.timers.pop_due(now);
                let (id, callback) = match due {
                    Some(due) => due,
                    None => break,
                };
                callback.fire(id);
                n_timer += 1;
            }
        }

        let mut n_ext = 0;
        if self.external.has_pending() {
            for callback in self.external.drain() {
                callback.fire(0);
                n_ext += 1;
            }
        }

        n_io + n_timer + n_ext
    }

    /// Returns and clears the driver error from the wait phase of the most
    /// recent [`run_once`](Center::run_once), distinguishing a failed wait
    /// from an idle iteration. The wait failure contributes 0 to that
    /// call's count; the timer and external phases still ran. Owner thread
    /// only.
    pub fn take_wait_error(&self) -> Option<io::Error> {
        self.assert_owner("take_wait_error");
        unsafe { self.local_mut() }.wait_error.take()
    }

    /// Executes `callback` on the owner thread.
    ///
    /// From the owner thread this always runs inline, before returning,
    /// without touching the external queue. From any other thread,
    /// `run_async` queues fire-and-forget; otherwise the caller blocks
    /// until the owner thread has fired the callback.
    pub fn submit(&self, callback: CallbackHandle, run_async: bool) {
        if self.in_thread() {
            callback.fire(0);
            return;
        }

        if run_async {
            self.dispatch_external(callback);
        } else {
            let gate = Arc::new(SubmitGate::new(callback));
            self.dispatch_external(CallbackHandle::Shared(gate.clone()));
            gate.wait();
        }
    }

    /// Closure-flavored [`submit`](Center::submit).
    pub fn submit_with<F>(&self, f: F, always_async: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        let callback = CallbackHandle::Owned(Box::new(ClosureCall::new(f)));
        self.submit(callback, always_async);
    }

    /// Queues `callback` for the owner thread, waking it only when this is
    /// the first arrival since the last drain and the caller is not the
    /// owner itself.
    pub fn dispatch_external(&self, callback: CallbackHandle) {
        let first = self.external.push(callback);
        if first && !self.in_thread() {
            self.wake();
        }
    }

    /// Interrupts the owner thread's driver wait, if the driver needs it.
    pub fn wake(&self) {
        if !self.needs_wakeup.load(Ordering::Relaxed) {
            return;
        }

        let waker = self.waker.lock().clone();
        if let Some(waker) = waker {
            tracing::trace!("waking center");
            waker.wake();
        }
    }

    /// Registers interest in `added` readiness for `fd`. Owner thread only.
    pub fn add_interest(&self, fd: RawFd, current: Readiness, added: Readiness) -> io::Result<()> {
        self.assert_owner("add_interest");
        unsafe { self.local_mut() }.driver.add_interest(fd, current, added)
    }

    /// Drops interest in `removed` readiness for `fd`. Owner thread only.
    pub fn remove_interest(
        &self,
        fd: RawFd,
        current: Readiness,
        removed: Readiness,
    ) -> io::Result<()> {
        self.assert_owner("remove_interest");
        unsafe { self.local_mut() }
            .driver
            .remove_interest(fd, current, removed)
    }

    /// Resizes the driver's event buffer. Owner thread only.
    pub fn resize_events(&self, capacity: usize) -> io::Result<()> {
        self.assert_owner("resize_events");
        unsafe { self.local_mut() }.driver.resize(capacity)
    }

    fn assert_owner(&self, op: &str) {
        let owner = *self.owner.lock();
        let current = thread::current().id();
        assert!(
            owner == Some(current),
            "{} requires the owner thread (owner: {:?}, caller: {:?})",
            op,
            owner,
            current,
        );
    }

    /// Callers must hold owner-thread context and must not keep the borrow
    /// alive across a callback fire.
    #[allow(clippy::mut_from_ref)]
    unsafe fn local_mut(&self) -> &mut Local {
        &mut *self.local.get()
    }
}
