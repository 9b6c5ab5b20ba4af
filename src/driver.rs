use std::fmt;
use std::io;
use std::ops::{BitOr, BitOrAssign};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Readiness bitset reported by drivers.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Readiness(u8);

impl Readiness {
    pub const NONE: Self = Self(0);
    pub const READABLE: Self = Self(0b01);
    pub const WRITABLE: Self = Self(0b10);

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for Readiness {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl BitOrAssign for Readiness {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.with(rhs);
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match (self.is_readable(), self.is_writable()) {
            (true, true) => "READABLE | WRITABLE",
            (true, false) => "READABLE",
            (false, true) => "WRITABLE",
            (false, false) => "NONE",
        })
    }
}

/// A file descriptor that became ready during a driver wait.
#[derive(Copy, Clone, Debug)]
pub struct FiredEvent {
    pub fd: RawFd,
    pub readiness: Readiness,
}

/// Cross-thread handle that interrupts a driver blocked in
/// [`Driver::wait`].
///
/// The owner thread holds the driver `&mut` for the whole wait, so the
/// wake path has to be an independently shareable object, the same way
/// `mio::Waker` stands apart from `mio::Poll`.
pub trait DriverWaker: Send + Sync {
    fn wake(&self);
}

/// Pluggable I/O multiplexing backend driven by a
/// [`Center`](crate::Center).
///
/// Every method except [`waker`](Driver::waker)'s returned handle runs on
/// the owning thread only.
pub trait Driver: Send {
    /// One-time setup, run on the first `own()`. Failure aborts the own.
    fn init(&mut self, hint_capacity: usize) -> io::Result<()>;

    /// Registers interest in `added` for `fd`, which currently has
    /// `current` registered.
    fn add_interest(&mut self, fd: RawFd, current: Readiness, added: Readiness) -> io::Result<()>;

    /// Drops interest in `removed` for `fd`, which currently has `current`
    /// registered.
    fn remove_interest(
        &mut self,
        fd: RawFd,
        current: Readiness,
        removed: Readiness,
    ) -> io::Result<()>;

    /// Blocks up to `timeout` and appends ready fds to `fired`, returning
    /// how many were appended. Internal wakeup events are not reported.
    fn wait(&mut self, fired: &mut Vec<FiredEvent>, timeout: Option<Duration>)
        -> io::Result<usize>;

    /// Resizes the driver's event buffer.
    fn resize(&mut self, capacity: usize) -> io::Result<()>;

    /// Whether a foreign-thread submission must interrupt a blocked wait.
    fn needs_wakeup(&self) -> bool {
        true
    }

    /// Shareable wake handle, captured once per `own()`.
    fn waker(&self) -> Arc<dyn DriverWaker>;

    /// Runs at the end of every `own()`.
    fn on_activate(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Runs at the start of every `disown()`.
    fn on_deactivate(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::Readiness;

    #[test]
    fn readiness_set_algebra() {
        let both = Readiness::READABLE | Readiness::WRITABLE;

        assert!(Readiness::NONE.is_empty());
        assert!(!both.is_empty());
        assert!(both.is_readable() && both.is_writable());

        assert!(both.contains(Readiness::READABLE));
        assert!(both.contains(Readiness::WRITABLE));
        assert!(!Readiness::READABLE.contains(both));

        assert_eq!(both.without(Readiness::WRITABLE), Readiness::READABLE);
        assert_eq!(both.without(both), Readiness::NONE);
        assert_eq!(Readiness::NONE.with(Readiness::WRITABLE), Readiness::WRITABLE);

        let mut mask = Readiness::NONE;
        mask |= Readiness::READABLE;
        assert_eq!(mask, Readiness::READABLE);
    }
}
