//! Linux backend for [`crate::watcher`], built directly on epoll(7).

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use std::{cmp, io};

use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLPRI, EPOLLRDHUP};

use crate::watcher::{Interest, RawEvent};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

pub struct Selector {
    id: usize,
    epfd: RawFd,
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        let epfd = crate::syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Selector { id, epfd })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout = timeout
            .map(|to| cmp::min(to.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        let n = crate::syscall!(epoll_wait(
            self.epfd,
            events.inner.as_mut_ptr(),
            events.inner.capacity() as i32,
            timeout
        ))?;

        unsafe { events.inner.set_len(n as usize) };
        Ok(n as usize)
    }

    pub fn add(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: key,
        };
        crate::syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut info))?;
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: key,
        };
        crate::syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut info))?;
        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let mut info = libc::epoll_event { events: 0, u64: 0 };
        crate::syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut info))?;
        Ok(())
    }
}

fn interest_to_epoll(interest: Interest) -> u32 {
    // Level-triggered: the loop re-registers interest explicitly when an
    // io_t changes what it wants to watch, rather than on every wakeup.
    let mut kind = 0;
    if interest.readable {
        kind |= EPOLLIN;
    }
    if interest.writable {
        kind |= EPOLLOUT;
    }
    kind as u32
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}

pub struct Events {
    inner: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(cap: usize) -> Events {
        Events {
            inner: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<RawEvent> {
        self.inner.get(idx).map(|ev| {
            let flags = ev.events as i32;
            RawEvent {
                key: ev.u64,
                readable: flags & (EPOLLIN | EPOLLPRI) != 0,
                writable: flags & EPOLLOUT != 0,
                error: flags & EPOLLERR != 0,
                hup: flags & (EPOLLRDHUP | EPOLLHUP) != 0,
            }
        })
    }
}
