//! macOS backend for [`crate::watcher`], built directly on kqueue(2).

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use crate::watcher::{Interest, RawEvent};

pub struct Selector {
    id: usize,
    kq: RawFd,
}

static NEXT_ID: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

impl Selector {
    pub fn new() -> io::Result<Selector> {
        let kq = crate::syscall!(kqueue())?;
        crate::syscall!(fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC))?;
        let id = NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        Ok(Selector { id, kq })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn add(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
        self.apply(fd, key, interest, libc::EV_ADD)
    }

    pub fn modify(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
        self.apply(fd, key, interest, libc::EV_ADD)
    }

    fn apply(&self, fd: RawFd, key: u64, interest: Interest, base_flags: u16) -> io::Result<()> {
        let mut changes = Vec::with_capacity(2);
        changes.push(new_kevent(
            fd,
            libc::EVFILT_READ,
            if interest.readable { base_flags } else { libc::EV_DELETE },
            key,
        ));
        changes.push(new_kevent(
            fd,
            libc::EVFILT_WRITE,
            if interest.writable { base_flags } else { libc::EV_DELETE },
            key,
        ));

        let mut out = changes.clone();
        crate::syscall!(kevent(
            self.kq,
            changes.as_ptr(),
            changes.len() as i32,
            out.as_mut_ptr(),
            out.len() as i32,
            std::ptr::null()
        ))?;

        for ev in &out {
            if ev.flags & libc::EV_ERROR != 0 && ev.data != 0 {
                let err = ev.data as i32;
                // Deleting a filter that was never added is not an error.
                if err != libc::ENOENT as i32 {
                    return Err(io::Error::from_raw_os_error(err));
                }
            }
        }

        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        self.apply(fd, 0, Interest { readable: false, writable: false }, libc::EV_ADD)
    }

    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });

        let timeout_ptr = ts
            .as_ref()
            .map(|t| t as *const libc::timespec)
            .unwrap_or(std::ptr::null());

        let n = crate::syscall!(kevent(
            self.kq,
            std::ptr::null(),
            0,
            events.inner.as_mut_ptr(),
            events.inner.capacity() as i32,
            timeout_ptr
        ))?;

        unsafe { events.inner.set_len(n as usize) };
        Ok(n as usize)
    }
}

fn new_kevent(fd: RawFd, filter: i16, flags: u16, key: u64) -> libc::kevent {
    libc::kevent {
        ident: fd as libc::uintptr_t,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: key as *mut libc::c_void,
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.kq
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.kq);
        }
    }
}

pub struct Events {
    inner: Vec<libc::kevent>,
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

    /// Coalesces the (up to two) raw kevents sharing a key into a single
    /// `RawEvent`, matching the epoll backend's shape. Stale `event_index`
    /// bookkeeping lives in `Handle`, not here: `get` only reports what the
    /// kernel said for this wakeup.
    pub fn get(&self, idx: usize) -> Option<RawEvent> {
        self.inner.get(idx).map(|ev| RawEvent {
            key: ev.udata as u64,
            readable: ev.filter == libc::EVFILT_READ,
            writable: ev.filter == libc::EVFILT_WRITE
                || (ev.filter == libc::EVFILT_READ && ev.flags & libc::EV_EOF != 0),
            error: ev.flags & libc::EV_ERROR != 0,
            hup: ev.flags & libc::EV_EOF != 0,
        })
    }
}
