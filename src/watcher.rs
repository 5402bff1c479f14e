//! I/O watcher abstraction (component C): wraps the OS readiness
//! multiplexer behind a single small surface the event loop drives.
//! `poll` never invokes callbacks — it only fills a ready list that the
//! loop's dispatch step consumes.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use crate::sys;

/// What an `io_t` wants the watcher to notify it about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const NONE: Interest = Interest { readable: false, writable: false };
    pub const READABLE: Interest = Interest { readable: true, writable: false };
    pub const WRITABLE: Interest = Interest { readable: false, writable: true };
    pub const BOTH: Interest = Interest { readable: true, writable: true };
}

/// A single readiness notification. `key` is the fd packed as a `u64`,
/// matching whatever the caller registered it under.
#[derive(Debug, Clone, Copy)]
pub struct RawEvent {
    pub key: u64,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hup: bool,
}

pub struct Watcher {
    selector: sys::Selector,
    events: sys::Events,
}

impl Watcher {
    pub fn new(capacity: usize) -> io::Result<Watcher> {
        Ok(Watcher {
            selector: sys::Selector::new()?,
            events: sys::Events::with_capacity(capacity),
        })
    }

    pub fn add(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        trace!("watcher add fd={} readable={} writable={}", fd, interest.readable, interest.writable);
        self.selector.add(fd, fd as u64, interest)
    }

    pub fn modify(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        trace!("watcher modify fd={} readable={} writable={}", fd, interest.readable, interest.writable);
        self.selector.modify(fd, fd as u64, interest)
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        trace!("watcher delete fd={}", fd);
        self.selector.delete(fd)
    }

    /// Blocks for at most `timeout` (or indefinitely if `None`), returning
    /// the number of ready events. Fetch them with [`Watcher::event`].
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        self.selector.wait(&mut self.events, timeout)
    }

    pub fn event(&self, idx: usize) -> Option<RawEvent> {
        self.events.get(idx)
    }
}

impl AsRawFd for Watcher {
    fn as_raw_fd(&self) -> RawFd {
        self.selector.as_raw_fd()
    }
}
