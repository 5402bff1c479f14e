//! Component F — the channel façade: a cheap fd+id handle to register
//! read/write/close callbacks against, grounded in `Channel.hpp`'s
//! `Channel`/`SocketChannel` pair. Unlike the original's shared_ptr
//! pair, a `Channel` here is just `(fd, id)` — the actual state lives
//! in the loop's `Handle` table, addressed by that pair the same way
//! the original addresses it by `io_t*` plus a generation id.

use std::os::unix::io::RawFd;

use crate::error::{Error, Result};
use crate::evloop::Loop;
use crate::handle::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Opened,
    Closed,
    Connecting,
    Connected,
    Disconnected,
}

/// A lightweight reference to a registered `Handle`. Copy because it
/// carries no state of its own beyond the (fd, id) pair used to look
/// the handle up in the owning loop.
#[derive(Debug, Clone, Copy)]
pub struct Channel {
    fd: RawFd,
    id: u64,
}

impl Channel {
    pub fn from_handle(handle: &Handle) -> Channel {
        Channel { fd: handle.fd, id: handle.id }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn handle<'a>(&self, lp: &'a mut Loop) -> Option<&'a mut Handle> {
        let handle = lp.handles_mut().get_mut(self.fd)?;
        if handle.id != self.id {
            return None;
        }
        Some(handle)
    }

    pub fn is_opened(&self, lp: &mut Loop) -> bool {
        self.handle(lp).map(|h| h.is_opened()).unwrap_or(false)
    }

    pub fn is_closed(&self, lp: &mut Loop) -> bool {
        !self.is_opened(lp)
    }

    pub fn write(&self, lp: &mut Loop, data: &[u8]) -> Result<()> {
        match self.handle(lp) {
            Some(h) => h.write(data).map_err(Error::from),
            None => Ok(()),
        }
    }

    pub fn close(&self, lp: &mut Loop) {
        lp.close(self.fd);
    }

    pub fn on_read(&self, lp: &mut Loop, cb: impl FnMut(&mut Handle, &[u8]) + 'static) {
        if let Some(h) = self.handle(lp) {
            h.on_read = Some(Box::new(cb));
        }
    }

    pub fn on_write(&self, lp: &mut Loop, cb: impl FnMut(&mut Handle) + 'static) {
        if let Some(h) = self.handle(lp) {
            h.on_write = Some(Box::new(cb));
        }
    }

    pub fn on_close(&self, lp: &mut Loop, cb: impl FnMut(&mut Loop, &mut Handle) + 'static) {
        if let Some(h) = self.handle(lp) {
            h.on_close = Some(Box::new(cb));
        }
    }
}

/// Adds connection-oriented affordances (connect timeout, connect
/// callback, peer/local addresses) over a plain [`Channel`], the way
/// `SocketChannel` extends `Channel` in the original.
#[derive(Debug, Clone, Copy)]
pub struct SocketChannel {
    pub channel: Channel,
    pub status: Status,
}

impl SocketChannel {
    pub fn new(handle: &Handle) -> SocketChannel {
        SocketChannel { channel: Channel::from_handle(handle), status: Status::Opened }
    }

    pub fn fd(&self) -> RawFd {
        self.channel.fd()
    }

    pub fn is_connected(&self, lp: &mut Loop) -> bool {
        self.channel.is_opened(lp) && self.status == Status::Connected
    }

    pub fn send(&self, lp: &mut Loop, data: &[u8]) -> Result<()> {
        self.channel.write(lp, data)
    }

    pub fn on_connect(&self, lp: &mut Loop, mut cb: impl FnMut(&mut Handle) + 'static) {
        if let Some(h) = lp.handles_mut().get_mut(self.channel.fd) {
            if h.id == self.channel.id {
                h.on_connect = Some(Box::new(move |handle| cb(handle)));
            }
        }
    }
}
