//! Component E — the I/O handle: a single fd's registered interest,
//! write queue, callbacks and timers, indexed by file descriptor.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::Mutex;

use crate::event::{EventBase, EventKind};
use crate::tls::TlsSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    Stdin,
    Stdout,
    Stderr,
    File,
    Tcp,
    TcpListen,
    Udp,
    Ssl,
    Unknown,
}

pub type AcceptCb = Box<dyn FnMut(&mut Handle)>;
pub type ConnectCb = Box<dyn FnMut(&mut Handle)>;
pub type ReadCb = Box<dyn FnMut(&mut Handle, &[u8])>;
pub type WriteCb = Box<dyn FnMut(&mut Handle)>;
/// Unlike the other callbacks, `on_close` fires after the handle has
/// already been removed from the loop's table (see
/// `Loop::close`), so it can safely take `&mut Loop` alongside the
/// now-detached `&mut Handle`.
pub type CloseCb = Box<dyn FnMut(&mut crate::evloop::Loop, &mut Handle)>;

pub(crate) struct WriteBuf {
    pub data: Box<[u8]>,
    pub offset: usize,
}

impl WriteBuf {
    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }
}

/// Four independent timer slots an `io_t` can own, holding indices into
/// the loop's timer slab. `None` means the timer isn't currently armed.
#[derive(Default)]
pub struct HandleTimers {
    pub connect: Option<usize>,
    pub close: Option<usize>,
    pub keepalive: Option<usize>,
    pub heartbeat: Option<usize>,
}

fn raw_read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = crate::syscall!(read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()))?;
    Ok(n as usize)
}

fn raw_write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = crate::syscall!(write(fd, buf.as_ptr() as *const libc::c_void, buf.len()))?;
    Ok(n as usize)
}

pub struct Handle {
    pub base: EventBase,
    pub fd: RawFd,
    /// Stable id distinct from `fd`; incremented past every reused fd so
    /// a cross-thread-originated close can detect it targeted a handle
    /// that has since been recycled onto the same fd.
    pub id: u64,
    pub io_type: IoType,
    pub last_error: Option<io::Error>,
    pub readable: bool,
    pub writable: bool,
    pub opened: bool,
    pub closed: bool,
    /// Set while a nonblocking connect is outstanding; the next
    /// write-ready dispatch is routed to connect-completion instead of
    /// the write queue.
    pub connecting: bool,
    /// Set while a TLS handshake is outstanding on this fd; read/write
    /// readiness is routed to the handshake driver instead of
    /// `on_read`/`on_write`/`flush_queue` until it clears.
    pub handshaking: bool,
    pub local_addr: Option<SocketAddr>,
    pub peer_addr: Option<SocketAddr>,

    pub(crate) write_queue: Mutex<VecDeque<WriteBuf>>,

    pub on_accept: Option<AcceptCb>,
    pub on_connect: Option<ConnectCb>,
    pub on_read: Option<ReadCb>,
    pub on_write: Option<WriteCb>,
    pub on_close: Option<CloseCb>,

    pub timers: HandleTimers,
    pub tls: Option<TlsSession>,
    pub upstream: Option<RawFd>,

    /// Scratch kqueue bookkeeping. Reset unconditionally on every
    /// dispatch so `io_ready` stays idempotent regardless of how many
    /// times the watcher reports the same fd in one poll — this closes
    /// the open question about stale indices rather than reproducing it.
    pub event_index: [i32; 2],

    ctx: Option<Box<dyn std::any::Any + Send>>,
}

impl Handle {
    pub fn new(id: u64, fd: RawFd, io_type: IoType, priority: i32) -> Handle {
        Handle {
            base: EventBase::new(id, EventKind::Io, priority),
            fd,
            id,
            io_type,
            last_error: None,
            readable: false,
            writable: false,
            opened: true,
            closed: false,
            connecting: false,
            handshaking: false,
            local_addr: None,
            peer_addr: None,
            write_queue: Mutex::new(VecDeque::new()),
            on_accept: None,
            on_connect: None,
            on_read: None,
            on_write: None,
            on_close: None,
            timers: HandleTimers::default(),
            tls: None,
            upstream: None,
            event_index: [-1, -1],
            ctx: None,
        }
    }

    pub fn is_opened(&self) -> bool {
        self.opened && !self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_context<T: Send + 'static>(&mut self, ctx: T) {
        self.ctx = Some(Box::new(ctx));
    }

    pub fn context<T: Send + 'static>(&self) -> Option<&T> {
        self.ctx.as_ref().and_then(|b| b.downcast_ref())
    }

    pub fn context_mut<T: Send + 'static>(&mut self) -> Option<&mut T> {
        self.ctx.as_mut().and_then(|b| b.downcast_mut())
    }

    /// Called at the top of every dispatch pass touching this handle.
    /// Idempotent: safe to call more than once for the same wakeup.
    pub fn ready(&mut self) {
        self.event_index = [-1, -1];
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.write_queue.lock().unwrap().is_empty()
    }

    /// Reads directly from the fd (or TLS session, if enabled). Returns
    /// `NotConnected` if the handle was never opened, matching
    /// `io_read` on an unopened handle returning `-1` in the original.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.opened {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "handle not opened"));
        }
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "handle closed"));
        }

        if let Some(tls) = self.tls.as_mut() {
            return tls.read(self.fd, buf);
        }

        raw_read(self.fd, buf)
    }

    /// Non-blocking write with queueing fallback, per the original's
    /// `io_write` thread-safety algorithm: attempt the write directly
    /// while nothing is queued; if it would block or only partially
    /// completes, queue the remainder and arm writable interest. Always
    /// locks only around the queue-touching section.
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "handle closed"));
        }
        if data.is_empty() {
            return Ok(());
        }

        let mut queue = self.write_queue.lock().unwrap();
        if queue.is_empty() {
            drop(queue);
            match self.try_write_direct(data) {
                Ok(n) if n == data.len() => return Ok(()),
                Ok(n) => {
                    self.enqueue(&data[n..]);
                    return Ok(());
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.enqueue(data);
                    return Ok(());
                }
                Err(e) => {
                    self.last_error = Some(io::Error::new(e.kind(), e.to_string()));
                    return Err(e);
                }
            }
        }

        queue.push_back(WriteBuf { data: data.into(), offset: 0 });
        Ok(())
    }

    fn enqueue(&mut self, data: &[u8]) {
        self.write_queue.lock().unwrap().push_back(WriteBuf { data: data.into(), offset: 0 });
    }

    fn try_write_direct(&mut self, data: &[u8]) -> io::Result<usize> {
        if let Some(tls) = self.tls.as_mut() {
            return tls.write(self.fd, data);
        }
        raw_write(self.fd, data)
    }

    /// Sends one datagram to `addr`, bypassing the stream write queue —
    /// datagrams are never partially written or deferred.
    pub fn send_to(&mut self, data: &[u8], addr: std::net::SocketAddr) -> io::Result<usize> {
        crate::sys::socket::sendto_raw(self.fd, data, &addr)
    }

    /// Drains as much of the write queue as the fd will currently
    /// accept; called when the watcher reports the fd writable.
    pub fn flush_queue(&mut self) -> io::Result<()> {
        loop {
            let mut queue = self.write_queue.lock().unwrap();
            let Some(front) = queue.front_mut() else { return Ok(()) };
            let remaining = front.remaining().to_vec();
            drop(queue);

            match self.try_write_direct(&remaining) {
                Ok(n) if n == remaining.len() => {
                    self.write_queue.lock().unwrap().pop_front();
                }
                Ok(n) => {
                    let mut queue = self.write_queue.lock().unwrap();
                    if let Some(front) = queue.front_mut() {
                        front.offset += n;
                    }
                    return Ok(());
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    self.last_error = Some(io::Error::new(e.kind(), e.to_string()));
                    return Err(e);
                }
            }
        }
    }

    /// Tears the handle down: fails anything left in the write queue,
    /// closes the fd, and marks the handle closed. The caller is
    /// responsible for invoking `on_close` *after* this returns with the
    /// write mutex already released, matching the discipline that no
    /// callback ever runs while a `Handle` mutex is held.
    pub fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.opened = false;
        self.write_queue.lock().unwrap().clear();
        unsafe {
            let _ = libc::close(self.fd);
        }
    }
}

/// fd-indexed handle storage, resized to the next power of two on
/// demand, mirroring `io_get`'s growth policy.
#[derive(Default)]
pub struct HandleTable {
    slots: Vec<Option<Handle>>,
    next_id: u64,
}

impl HandleTable {
    pub fn new() -> HandleTable {
        HandleTable { slots: Vec::new(), next_id: 1 }
    }

    fn ensure_capacity(&mut self, fd: RawFd) {
        let need = fd as usize + 1;
        if need > self.slots.len() {
            let mut cap = self.slots.len().max(16);
            while cap < need {
                cap *= 2;
            }
            self.slots.resize_with(cap, || None);
        }
    }

    pub fn insert(&mut self, fd: RawFd, io_type: IoType, priority: i32) -> &mut Handle {
        self.ensure_capacity(fd);
        let id = self.next_id;
        self.next_id += 1;
        self.slots[fd as usize] = Some(Handle::new(id, fd, io_type, priority));
        self.slots[fd as usize].as_mut().unwrap()
    }

    pub fn get(&self, fd: RawFd) -> Option<&Handle> {
        self.slots.get(fd as usize).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Handle> {
        self.slots.get_mut(fd as usize).and_then(|s| s.as_mut())
    }

    /// Removes the handle at `fd`, but only if it still carries `id` —
    /// guards against a cross-thread close racing a fd-reuse accept.
    pub fn remove_if_id(&mut self, fd: RawFd, id: u64) -> Option<Handle> {
        if let Some(slot) = self.slots.get_mut(fd as usize) {
            if slot.as_ref().map(|h| h.id) == Some(id) {
                return slot.take();
            }
        }
        None
    }

    pub fn remove(&mut self, fd: RawFd) -> Option<Handle> {
        self.slots.get_mut(fd as usize).and_then(|s| s.take())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Handle> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }
}
