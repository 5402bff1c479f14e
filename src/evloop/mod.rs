//! Component D — the event loop dispatch cycle. Named `evloop` rather
//! than `loop` because the latter is a reserved word, matching the
//! teacher's own module naming for this subsystem.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use concurrent_queue::ConcurrentQueue;
use slab::Slab;

use crate::collections::{PendingQueue, TimerHeap};
use crate::event::EventKind;
use crate::handle::{Handle, HandleTable, IoType};
use crate::sys::socket::Socket;
use crate::time;
use crate::timer::{Idle, Timer, TimerSpec};
use crate::tls::HandshakeStatus;
use crate::watcher::{Interest, Watcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Stop,
    Running,
    Pause,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoopFlags {
    pub run_once: bool,
    pub quit_when_no_active_events: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub flags: LoopFlags,
    pub read_buf_size: usize,
    pub events_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> LoopConfig {
        LoopConfig { flags: LoopFlags::default(), read_buf_size: 64 * 1024, events_capacity: 1024 }
    }
}

type CustomEvent = Box<dyn FnOnce(&mut Loop) + Send>;

/// The reactor: one per thread. Owns the watcher, the handle table, the
/// timer heap, the idle list, the pending-dispatch buckets, and the
/// cross-thread wakeup/custom-event machinery.
pub struct Loop {
    watcher: Watcher,
    handles: HandleTable,
    idles: Slab<Idle>,
    timers: Slab<Timer>,
    timer_heap: TimerHeap,
    pending: PendingQueue,

    status: Status,
    flags: LoopFlags,
    nactives: usize,

    start_ms: u64,
    start_us: u64,
    cur_us: u64,
    loop_cnt: u64,
    next_event_id: u64,
    pid: u32,
    tid: u64,

    read_buf: Vec<u8>,
    userdata: Option<Box<dyn std::any::Any + Send>>,

    wake_read: Socket,
    wake_fd: RawFd,
    wake_write: Arc<Socket>,
    custom_events: Arc<ConcurrentQueue<CustomEvent>>,
    stopping: Arc<AtomicBool>,
}

/// A thread-safe proxy that can wake a [`Loop`] and post work onto it
/// from any thread, used by `post_event`/`wakeup` and by
/// `EventLoopThreadPool` to hand off accepted connections.
#[derive(Clone)]
pub struct LoopHandle {
    wake_write: Arc<Socket>,
    custom_events: Arc<ConcurrentQueue<CustomEvent>>,
    stopping: Arc<AtomicBool>,
}

impl LoopHandle {
    pub fn post_event(&self, f: impl FnOnce(&mut Loop) + Send + 'static) {
        if self.custom_events.push(Box::new(f)).is_ok() {
            let _ = self.wake_write.write(&[1]);
        }
    }

    pub fn wakeup(&self) {
        let _ = self.wake_write.write(&[1]);
    }

    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.wakeup();
    }
}

impl Loop {
    pub fn new() -> std::io::Result<Loop> {
        Loop::with_config(LoopConfig::default())
    }

    pub fn with_config(config: LoopConfig) -> std::io::Result<Loop> {
        let (wake_read, wake_write) = Socket::pair(libc::AF_UNIX, libc::SOCK_STREAM)?;
        wake_read.set_nonblocking(true)?;
        let watcher = Watcher::new(config.events_capacity)?;
        let wake_fd = wake_read.as_raw_fd();
        watcher.add(wake_fd, Interest::READABLE)?;

        let now_us = time::now_us();

        Ok(Loop {
            watcher,
            handles: HandleTable::new(),
            idles: Slab::new(),
            timers: Slab::new(),
            timer_heap: TimerHeap::new(),
            pending: PendingQueue::new(),
            status: Status::Stop,
            flags: config.flags,
            nactives: 0,
            start_ms: time::wall_ms(),
            start_us: now_us,
            cur_us: now_us,
            loop_cnt: 0,
            next_event_id: 1,
            pid: std::process::id(),
            tid: thread_id(),
            read_buf: vec![0u8; config.read_buf_size],
            userdata: None,
            wake_read,
            wake_fd,
            wake_write: Arc::new(wake_write),
            custom_events: Arc::new(ConcurrentQueue::unbounded()),
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            wake_write: self.wake_write.clone(),
            custom_events: self.custom_events.clone(),
            stopping: self.stopping.clone(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn tid(&self) -> u64 {
        self.tid
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    pub fn start_us(&self) -> u64 {
        self.start_us
    }

    pub fn now_us(&self) -> u64 {
        self.cur_us
    }

    pub fn now_ms(&self) -> u64 {
        self.cur_us / 1_000
    }

    pub fn set_userdata<T: Send + 'static>(&mut self, data: T) {
        self.userdata = Some(Box::new(data));
    }

    pub fn userdata<T: Send + 'static>(&self) -> Option<&T> {
        self.userdata.as_ref().and_then(|d| d.downcast_ref())
    }

    pub fn handles_mut(&mut self) -> &mut HandleTable {
        &mut self.handles
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    /// Monotonically increasing, unique per loop — every idle, timer
    /// and handle pulls its event id from here rather than deriving one
    /// from a collection length that can shrink.
    fn alloc_event_id(&mut self) -> u64 {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }

    // ---- idle -----------------------------------------------------

    pub fn idle_add(&mut self, priority: i32, cb: impl FnMut(&mut Loop, u64) + 'static) -> usize {
        let id = self.alloc_event_id();
        let idx = self.idles.insert(Idle {
            base: crate::event::EventBase::new(id, EventKind::Idle, priority),
            cb: Some(Box::new(cb)),
        });
        self.idles[idx].base.active = true;
        self.nactives += 1;
        idx
    }

    pub fn idle_del(&mut self, idx: usize) {
        if self.idles.contains(idx) {
            self.idles.remove(idx);
            self.nactives = self.nactives.saturating_sub(1);
        }
    }

    // ---- timers -----------------------------------------------------

    pub fn timer_add(&mut self, timeout_us: u64, repeat: u32, cb: impl FnMut(&mut Loop, u64) + 'static) -> usize {
        self.add_timer(TimerSpec::Interval { interval_us: timeout_us, repeat }, cb)
    }

    pub fn timer_add_period(
        &mut self,
        minute: i32,
        hour: i32,
        day: i32,
        week: i32,
        month: i32,
        repeat: u32,
        cb: impl FnMut(&mut Loop, u64) + 'static,
    ) -> usize {
        self.add_timer(TimerSpec::Period { minute, hour, day, week, month, repeat }, cb)
    }

    fn add_timer(&mut self, spec: TimerSpec, cb: impl FnMut(&mut Loop, u64) + 'static) -> usize {
        let id = self.alloc_event_id();
        let mut timer = Timer {
            base: crate::event::EventBase::new(id, EventKind::Timeout, 0),
            spec,
            next_timeout_us: 0,
            fired: 0,
            cb: Some(Box::new(cb)),
        };
        timer.base.kind = timer.kind();
        timer.next_timeout_us = timer.compute_next(self.cur_us);
        let next = timer.next_timeout_us;
        timer.base.active = true;
        let idx = self.timers.insert(timer);
        self.timer_heap.push(idx, next);
        self.nactives += 1;
        idx
    }

    /// Cancels a timer before it fires. Removes the slab slot
    /// immediately rather than merely marking it inactive, so a
    /// canceled timer doesn't sit in `self.timers` until its stale
    /// heap entry eventually surfaces; the heap itself still lazily
    /// skips that entry when it does.
    pub fn timer_del(&mut self, idx: usize) {
        if self.timers.contains(idx) {
            self.timers.remove(idx);
            self.nactives = self.nactives.saturating_sub(1);
        }
    }

    // ---- dispatch -----------------------------------------------------

    pub fn run(&mut self) -> std::io::Result<()> {
        self.status = Status::Running;
        debug!("loop run pid={} tid={}", self.pid, self.tid);

        loop {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            self.run_once()?;

            if self.flags.run_once {
                break;
            }
            if self.flags.quit_when_no_active_events && self.nactives == 0 {
                break;
            }
        }

        self.status = Status::Stop;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    fn update_time(&mut self) {
        self.cur_us = time::now_us();
    }

    fn run_once(&mut self) -> std::io::Result<()> {
        self.loop_cnt += 1;
        self.update_time();

        let block_us = self.compute_blocktime_us();
        let timeout = if !self.pending.is_empty() {
            Some(Duration::from_micros(0))
        } else {
            Some(Duration::from_micros(block_us))
        };

        let n = self.watcher.poll(timeout)?;
        self.update_time();

        for i in 0..n {
            if let Some(ev) = self.watcher.event(i) {
                if ev.key as RawFd == self.wake_fd {
                    self.drain_wakeups();
                    continue;
                }
                self.queue_io_pending(ev);
            }
        }

        self.run_timers();
        if self.pending.is_empty() {
            self.run_idles();
        }
        self.drain_pending();

        Ok(())
    }

    fn compute_blocktime_us(&self) -> u64 {
        const CAP_US: u64 = 1_000_000;
        match self.timer_heap.peek_timeout_us() {
            Some(next) if next > self.cur_us => (next - self.cur_us).min(CAP_US),
            Some(_) => 0,
            None => CAP_US,
        }
    }

    fn drain_wakeups(&mut self) {
        let mut buf = [0u8; 256];
        loop {
            match self.wake_read.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }

        while let Ok(job) = self.custom_events.pop() {
            job(self);
        }
    }

    fn queue_io_pending(&mut self, ev: crate::watcher::RawEvent) {
        let fd = ev.key as RawFd;
        let Some(handle) = self.handles.get_mut(fd) else { return };
        // Per the watcher contract, hangup and error both carry read
        // *and* write readiness — a pure-error revent with no `hup`
        // must still unblock the handle instead of stalling silently.
        handle.readable = ev.readable || ev.hup || ev.error;
        handle.writable = ev.writable || ev.hup || ev.error;
        if ev.error {
            handle.last_error = Some(std::io::Error::new(std::io::ErrorKind::Other, "io error"));
        }
        if !handle.base.pending {
            handle.base.pending = true;
            let priority = handle.base.priority;
            self.pending.push(priority, fd as usize, |next| handle.base.pending_next = next);
        }
    }

    fn run_timers(&mut self) {
        while let Some(idx) = self.timer_heap.pop_due(self.cur_us) {
            let Some(timer) = self.timers.get_mut(idx) else { continue };
            if !timer.base.active {
                continue;
            }
            let Some(mut cb) = timer.cb.take() else { continue };

            timer.fired += 1;
            let id = timer.base.id;
            cb(self, id);

            let Some(timer) = self.timers.get_mut(idx) else { continue };
            if timer.should_reschedule() {
                let next = timer.compute_next(self.cur_us);
                timer.next_timeout_us = next;
                timer.cb = Some(cb);
                self.timer_heap.push(idx, next);
            } else {
                timer.base.active = false;
                self.nactives = self.nactives.saturating_sub(1);
                self.timers.remove(idx);
            }
        }
    }

    fn run_idles(&mut self) {
        let ids: Vec<usize> = self.idles.iter().map(|(i, _)| i).collect();
        for idx in ids {
            let Some(idle) = self.idles.get_mut(idx) else { continue };
            if !idle.base.active {
                continue;
            }
            let Some(mut cb) = idle.cb.take() else { continue };
            let id = idle.base.id;
            cb(self, id);
            if let Some(idle) = self.idles.get_mut(idx) {
                idle.cb = Some(cb);
            }
        }
    }

    fn drain_pending(&mut self) {
        for priority in (crate::collections::pending::LOWEST_PRIORITY..=crate::collections::pending::HIGHEST_PRIORITY).rev() {
            let handles = &self.handles;
            let fds: Vec<usize> = self.pending.drain_bucket(priority, |idx| {
                handles.get(idx as RawFd).and_then(|h| h.base.pending_next)
            });
            for fd in fds {
                self.dispatch_io(fd as RawFd);
            }
        }
    }

    fn dispatch_io(&mut self, fd: RawFd) {
        let Some((readable, writable, connecting, handshaking, io_type)) = self.handles.get_mut(fd).map(|handle| {
            handle.base.pending = false;
            handle.base.pending_next = None;
            handle.ready();
            (handle.readable, handle.writable, handle.connecting, handle.handshaking, handle.io_type)
        }) else {
            return;
        };

        if writable && connecting {
            self.dispatch_connect(fd);
            return;
        }

        if handshaking {
            if readable || writable {
                self.dispatch_handshake(fd);
            }
            return;
        }

        if writable {
            if let Some(handle) = self.handles.get_mut(fd) {
                let _ = handle.flush_queue();
                if !handle.has_pending_writes() {
                    if let Some(mut cb) = handle.on_write.take() {
                        cb(handle);
                        if let Some(h) = self.handles.get_mut(fd) {
                            h.on_write = Some(cb);
                        }
                    }
                }
            }
        }

        if readable && self.handles.get(fd).is_some() {
            match io_type {
                IoType::TcpListen => self.dispatch_accept(fd),
                IoType::Udp => self.dispatch_udp_read(fd),
                _ => self.dispatch_read(fd),
            }
        }
    }

    /// Called once a handle's raw accept/connect has completed and any
    /// TLS session has been attached by its `on_accept`/`on_connect`
    /// wiring hook. Fires the established callback immediately when
    /// there's no handshake to wait on, otherwise arms the handshake
    /// driver and defers it until `dispatch_handshake` reports `Ok`.
    fn begin_session(&mut self, fd: RawFd) {
        let has_tls = self.handles.get(fd).map(|h| h.tls.is_some()).unwrap_or(false);
        if !has_tls {
            self.fire_on_connect(fd);
            return;
        }
        if let Some(handle) = self.handles.get_mut(fd) {
            handle.handshaking = true;
        }
        self.dispatch_handshake(fd);
    }

    /// Drives one non-blocking handshake attempt, re-arming read/write
    /// interest on `WantRead`/`WantWrite`. On `Ok` the established
    /// callback fires; on `Err` the handle is closed with the TLS
    /// error already set as `last_error`, so `on_close` sees it.
    fn dispatch_handshake(&mut self, fd: RawFd) {
        let Some(handle) = self.handles.get_mut(fd) else { return };
        let Some(tls) = handle.tls.as_mut() else {
            handle.handshaking = false;
            return;
        };

        match tls.handshake(fd) {
            HandshakeStatus::Ok => {
                if let Some(h) = self.handles.get_mut(fd) {
                    h.handshaking = false;
                }
                let _ = self.set_interest(fd, Interest::READABLE);
                self.fire_on_connect(fd);
            }
            HandshakeStatus::WantRead => {
                let _ = self.set_interest(fd, Interest::READABLE);
            }
            HandshakeStatus::WantWrite => {
                let _ = self.set_interest(fd, Interest::WRITABLE);
            }
            HandshakeStatus::Err => {
                if let Some(h) = self.handles.get_mut(fd) {
                    h.last_error = Some(std::io::Error::new(std::io::ErrorKind::Other, "tls handshake failed"));
                }
                self.close(fd);
            }
        }
    }

    fn fire_on_connect(&mut self, fd: RawFd) {
        if let Some(handle) = self.handles.get_mut(fd) {
            if let Some(mut cb) = handle.on_connect.take() {
                cb(handle);
                if let Some(h) = self.handles.get_mut(fd) {
                    h.on_connect = Some(cb);
                }
            }
        }
    }

    fn dispatch_udp_read(&mut self, fd: RawFd) {
        let mut buf = std::mem::take(&mut self.read_buf);
        loop {
            match crate::sys::socket::recvfrom_raw(fd, &mut buf) {
                Ok((n, peer)) => {
                    if let Some(handle) = self.handles.get_mut(fd) {
                        handle.peer_addr = Some(peer);
                        if let Some(mut cb) = handle.on_read.take() {
                            cb(handle, &buf[..n]);
                            if let Some(h) = self.handles.get_mut(fd) {
                                h.on_read = Some(cb);
                            }
                        }
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        self.read_buf = buf;
    }

    fn dispatch_accept(&mut self, fd: RawFd) {
        loop {
            let accepted = match self.handles.get(fd).map(|h| h.fd) {
                Some(listen_fd) => crate::sys::socket::accept_raw(listen_fd),
                None => return,
            };

            let (conn_fd, peer) = match accepted {
                Ok(pair) => pair,
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(_) => return,
            };

            let Some(handle) = self.handles.get_mut(fd) else { return };
            if let Some(mut cb) = handle.on_accept.take() {
                let conn_handle = match self.register_io(conn_fd, IoType::Tcp, 0) {
                    Ok(h) => h,
                    Err(_) => {
                        unsafe { libc::close(conn_fd) };
                        if let Some(h) = self.handles.get_mut(fd) {
                            h.on_accept = Some(cb);
                        }
                        continue;
                    }
                };
                conn_handle.peer_addr = Some(peer);
                cb(self.handles.get_mut(conn_fd).unwrap());
                // on_accept may have rejected the connection via
                // `Handle::teardown` (it has no `&mut Loop` to call
                // `close` with) — finish deregistering it here so the
                // watcher and handle table don't keep a dead fd alive.
                if self.handles.get(conn_fd).is_some_and(|h| h.closed) {
                    let _ = self.watcher.delete(conn_fd);
                    self.handles.remove(conn_fd);
                    self.nactives = self.nactives.saturating_sub(1);
                } else {
                    self.begin_session(conn_fd);
                }
                if let Some(h) = self.handles.get_mut(fd) {
                    h.on_accept = Some(cb);
                }
            }
        }
    }

    fn dispatch_read(&mut self, fd: RawFd) {
        let mut buf = std::mem::take(&mut self.read_buf);
        let result = match self.handles.get_mut(fd) {
            Some(handle) => handle.read(&mut buf),
            None => {
                self.read_buf = buf;
                return;
            }
        };

        match result {
            Ok(0) => {
                self.read_buf = buf;
                self.close(fd);
            }
            Ok(n) => {
                if let Some(handle) = self.handles.get_mut(fd) {
                    if let Some(mut cb) = handle.on_read.take() {
                        cb(handle, &buf[..n]);
                        if let Some(h) = self.handles.get_mut(fd) {
                            h.on_read = Some(cb);
                        }
                    }
                }
                self.read_buf = buf;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                self.read_buf = buf;
            }
            Err(_) => {
                self.read_buf = buf;
                self.close(fd);
            }
        }
    }

    /// Tears a handle down and fires its `close_cb`, if any, with the
    /// write mutex already released — the callback may itself close
    /// other handles or post new events without deadlocking.
    pub fn close(&mut self, fd: RawFd) {
        let _ = self.watcher.delete(fd);
        if let Some(mut handle) = self.handles.remove(fd) {
            handle.teardown();
            self.nactives = self.nactives.saturating_sub(1);
            if let Some(mut cb) = handle.on_close.take() {
                cb(self, &mut handle);
            }
        }
    }

    pub fn register_io(&mut self, fd: RawFd, io_type: IoType, priority: i32) -> std::io::Result<&mut Handle> {
        self.register_io_interest(fd, io_type, priority, Interest::READABLE)
    }

    pub fn register_io_interest(
        &mut self,
        fd: RawFd,
        io_type: IoType,
        priority: i32,
        interest: Interest,
    ) -> std::io::Result<&mut Handle> {
        self.watcher.add(fd, interest)?;
        self.nactives += 1;
        Ok(self.handles.insert(fd, io_type, priority))
    }

    pub fn set_interest(&mut self, fd: RawFd, interest: Interest) -> std::io::Result<()> {
        self.watcher.modify(fd, interest)
    }

    /// Starts a nonblocking connect to `addr`, registers the resulting
    /// fd for write-readiness, and arms a connect-timeout timer when
    /// `timeout_us` is nonzero. The handle's `on_connect` fires once the
    /// connect completes (success or failure surfaces through
    /// `on_close`, per the loop's error-delivery policy); set it before
    /// the next `run_once` drains the write-ready event.
    pub fn connect_async(
        &mut self,
        addr: std::net::SocketAddr,
        io_type: IoType,
        priority: i32,
        timeout_us: u64,
    ) -> std::io::Result<RawFd> {
        let (fd, _immediate) = crate::sys::socket::connect_nonblocking(&addr)?;
        let handle = self.register_io_interest(fd, io_type, priority, Interest::WRITABLE)?;
        handle.connecting = true;
        handle.peer_addr = Some(addr);

        if timeout_us > 0 {
            let timer_idx = self.timer_add(timeout_us, 1, move |lp, _id| {
                if let Some(h) = lp.handles.get_mut(fd) {
                    if h.connecting {
                        h.last_error = Some(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"));
                        h.timers.connect = None;
                        lp.close(fd);
                    }
                }
            });
            if let Some(handle) = self.handles.get_mut(fd) {
                handle.timers.connect = Some(timer_idx);
            }
        }

        Ok(fd)
    }

    /// Completes or fails an outstanding nonblocking connect once the
    /// fd reports write-ready, per `SO_ERROR`.
    fn dispatch_connect(&mut self, fd: RawFd) {
        let result = crate::sys::socket::take_socket_error(fd);

        match result {
            Ok(None) => {
                if let Some(idx) = self.handles.get(fd).and_then(|h| h.timers.connect) {
                    self.timer_del(idx);
                }
                let peer = crate::sys::socket::peername_raw(fd).ok();
                if let Some(handle) = self.handles.get_mut(fd) {
                    handle.connecting = false;
                    handle.timers.connect = None;
                    if peer.is_some() {
                        handle.peer_addr = peer;
                    }
                }
                let _ = self.set_interest(fd, Interest::READABLE);
                self.begin_session(fd);
            }
            Ok(Some(e)) | Err(e) => {
                if let Some(idx) = self.handles.get(fd).and_then(|h| h.timers.connect) {
                    self.timer_del(idx);
                }
                if let Some(handle) = self.handles.get_mut(fd) {
                    handle.last_error = Some(e);
                    handle.timers.connect = None;
                }
                self.close(fd);
            }
        }
    }
}

fn thread_id() -> u64 {
    unsafe { libc::pthread_self() as u64 }
}
