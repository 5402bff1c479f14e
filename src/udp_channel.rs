//! Component F — `UdpServer`/`UdpClient`, grounded in `UdpServer.hpp`
//! and `UdpClient.hpp`. Datagrams dispatch through
//! `evloop::Loop::dispatch_udp_read` rather than the stream `read`
//! path, so a single fd replaces both the original's accept-per-peer
//! model and its single long-lived channel.

use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use crate::error::Result;
use crate::evloop::Loop;
use crate::handle::{Handle, IoType};
use crate::net::udp::UdpSocket;

pub type MessageCb = Arc<dyn Fn(&mut Handle, &[u8]) + Send + Sync>;
pub type WriteCompleteCb = Arc<dyn Fn(&mut Handle) + Send + Sync>;

pub struct UdpServer {
    socket: UdpSocket,
    on_message: Option<MessageCb>,
    on_write_complete: Option<WriteCompleteCb>,
}

impl UdpServer {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<UdpServer> {
        let socket = UdpSocket::bind(addr)?;
        Ok(UdpServer { socket, on_message: None, on_write_complete: None })
    }

    pub fn on_message(&mut self, cb: impl Fn(&mut Handle, &[u8]) + Send + Sync + 'static) {
        self.on_message = Some(Arc::new(cb));
    }

    pub fn on_write_complete(&mut self, cb: impl Fn(&mut Handle) + Send + Sync + 'static) {
        self.on_write_complete = Some(Arc::new(cb));
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Registers the bound socket with `lp` and arms the datagram
    /// callback.
    pub fn attach(&self, lp: &mut Loop) -> Result<()> {
        let fd = self.socket.as_raw_fd();
        let handle = lp.register_io(fd, IoType::Udp, 0)?;

        let on_message = self.on_message.clone();
        handle.on_read = Some(Box::new(move |h, data| {
            if let Some(cb) = &on_message {
                cb(h, data);
            }
        }));

        let on_write_complete = self.on_write_complete.clone();
        handle.on_write = Some(Box::new(move |h| {
            if let Some(cb) = &on_write_complete {
                cb(h);
            }
        }));

        Ok(())
    }

    /// Sends a datagram to `peer` through the loop's registered handle
    /// for this socket (falls back to the raw socket if unregistered).
    pub fn send_to(&self, lp: &mut Loop, data: &[u8], peer: SocketAddr) -> Result<usize> {
        let fd = self.socket.as_raw_fd();
        if let Some(handle) = lp.handles_mut().get_mut(fd) {
            return Ok(handle.send_to(data, peer)?);
        }
        Ok(self.socket.send_to(data, peer)?)
    }
}

pub struct UdpClient {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpClient {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<UdpClient> {
        let peer = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| crate::error::Error::InvalidArgument("no address resolved".into()))?;

        let local: SocketAddr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse().unwrap();
        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;

        Ok(UdpClient { socket, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn attach(&self, lp: &mut Loop, mut on_message: impl FnMut(&[u8]) + 'static) -> Result<()> {
        let fd = self.socket.as_raw_fd();
        let handle = lp.register_io(fd, IoType::Udp, 0)?;
        handle.peer_addr = Some(self.peer);
        handle.on_read = Some(Box::new(move |_h, data| on_message(data)));
        Ok(())
    }

    pub fn send(&self, lp: &mut Loop, data: &[u8]) -> Result<usize> {
        let fd = self.socket.as_raw_fd();
        if let Some(handle) = lp.handles_mut().get_mut(fd) {
            return Ok(handle.send_to(data, self.peer)?);
        }
        Ok(self.socket.send(data)?)
    }
}
