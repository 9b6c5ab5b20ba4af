use crate::driver::{Driver, DriverWaker, FiredEvent, Readiness};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

// Fds are their own tokens, so the wake token can never collide with one.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// mio-backed [`Driver`]: epoll, kqueue and friends behind one surface.
pub struct PollDriver {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
}

impl PollDriver {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        // The real buffer comes from init's capacity hint.
        Ok(Self {
            poll,
            events: Events::with_capacity(0),
            waker,
        })
    }
}

impl DriverWaker for Waker {
    fn wake(&self) {
        if let Err(err) = Waker::wake(self) {
            tracing::warn!(error = %err, "os wakeup failed");
        }
    }
}

fn to_interest(readiness: Readiness) -> Option<Interest> {
    match (readiness.is_readable(), readiness.is_writable()) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}

impl Driver for PollDriver {
    fn init(&mut self, hint_capacity: usize) -> io::Result<()> {
        self.events = Events::with_capacity(hint_capacity.max(1));
        Ok(())
    }

    fn add_interest(&mut self, fd: RawFd, current: Readiness, added: Readiness) -> io::Result<()> {
        let interest = match to_interest(current.with(added)) {
            Some(interest) => interest,
            None => return Ok(()),
        };

        let mut source = SourceFd(&fd);
        if current.is_empty() {
            self.poll
                .registry()
                .register(&mut source, Token(fd as usize), interest)
        } else {
            self.poll
                .registry()
                .reregister(&mut source, Token(fd as usize), interest)
        }
    }

    fn remove_interest(
        &mut self,
        fd: RawFd,
        current: Readiness,
        removed: Readiness,
    ) -> io::Result<()> {
        let mut source = SourceFd(&fd);
        match to_interest(current.without(removed)) {
            Some(interest) => self
                .poll
                .registry()
                .reregister(&mut source, Token(fd as usize), interest),
            None => self.poll.registry().deregister(&mut source),
        }
    }

    fn wait(
        &mut self,
        fired: &mut Vec<FiredEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(err) => return Err(err),
        }

        let mut count = 0;
        for event in self.events.iter() {
            if event.token() == WAKE_TOKEN {
                continue;
            }

            let mut readiness = Readiness::NONE;
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                readiness |= Readiness::READABLE;
            }
            if event.is_writable() || event.is_write_closed() || event.is_error() {
                readiness |= Readiness::WRITABLE;
            }
            if readiness.is_empty() {
                continue;
            }

            fired.push(FiredEvent {
                fd: event.token().0 as RawFd,
                readiness,
            });
            count += 1;
        }

        Ok(count)
    }

    fn resize(&mut self, capacity: usize) -> io::Result<()> {
        self.events = Events::with_capacity(capacity.max(1));
        Ok(())
    }

    fn waker(&self) -> Arc<dyn DriverWaker> {
        self.waker.clone()
    }
}
