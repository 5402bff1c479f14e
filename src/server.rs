//! Component F — `TcpServer`, grounded in `TcpServer.hpp`. Binds a
//! listening socket, enforces `max_connections`, and wires accepted
//! connections into [`SocketChannel`]s tracked in a shared map so
//! `connection_count` stays accurate across every loop in a thread
//! pool, the same way the original guards `channels` with one mutex
//! shared by every `EventLoopThread`.

use std::net::ToSocketAddrs;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::channel::{SocketChannel, Status};
use crate::error::Result;
use crate::evloop::Loop;
use crate::handle::{Handle, IoType};
use crate::net::tcp::TcpListener;
use crate::tls::TlsConfig;

pub type ConnectionCb = Arc<dyn Fn(SocketChannel) + Send + Sync>;
/// Fires with the connection's own handle, so a reply can be written
/// synchronously with `handle.write(..)` — no `&mut Loop` is available
/// this deep in dispatch (see `on_read`'s contract on `Handle`).
pub type MessageCb = Arc<dyn Fn(&mut Handle, &[u8]) + Send + Sync>;
pub type WriteCompleteCb = Arc<dyn Fn(&mut Handle) + Send + Sync>;

#[derive(Default, Clone)]
struct Callbacks {
    on_connection: Option<ConnectionCb>,
    on_message: Option<MessageCb>,
    on_write_complete: Option<WriteCompleteCb>,
}

pub struct TcpServer {
    listener: TcpListener,
    tls: Option<Arc<TlsConfig>>,
    max_connections: usize,
    channels: Arc<Mutex<IndexMap<i32, SocketChannel>>>,
    callbacks: Callbacks,
}

impl TcpServer {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<TcpServer> {
        let listener = TcpListener::bind(addr)?;
        Ok(TcpServer {
            listener,
            tls: None,
            max_connections: u32::MAX as usize,
            channels: Arc::new(Mutex::new(IndexMap::new())),
            callbacks: Callbacks::default(),
        })
    }

    pub fn set_max_connections(&mut self, n: usize) {
        self.max_connections = n;
    }

    pub fn with_tls(&mut self, cfg: TlsConfig) {
        self.tls = Some(Arc::new(cfg));
    }

    pub fn on_connection(&mut self, cb: impl Fn(SocketChannel) + Send + Sync + 'static) {
        self.callbacks.on_connection = Some(Arc::new(cb));
    }

    pub fn on_message(&mut self, cb: impl Fn(&mut Handle, &[u8]) + Send + Sync + 'static) {
        self.callbacks.on_message = Some(Arc::new(cb));
    }

    pub fn on_write_complete(&mut self, cb: impl Fn(&mut Handle) + Send + Sync + 'static) {
        self.callbacks.on_write_complete = Some(Arc::new(cb));
    }

    pub fn connection_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Registers the listening socket with `lp` and arms the accept
    /// callback. Call once per loop the server should accept on — a
    /// multi-loop `TcpServer` calls this once per `EventLoopThread`.
    pub fn attach(&self, lp: &mut Loop) -> Result<()> {
        let listen_fd = self.listener.as_raw_fd();
        let handle = lp.register_io(listen_fd, IoType::TcpListen, 0)?;

        let channels = self.channels.clone();
        let max_connections = self.max_connections;
        let callbacks = self.callbacks.clone();
        let tls = self.tls.clone();

        handle.on_accept = Some(Box::new(move |conn_handle| {
            if channels.lock().unwrap().len() >= max_connections {
                conn_handle.teardown();
                return;
            }

            if let Some(cfg) = &tls {
                if let Some(server_cfg) = cfg.server.clone() {
                    if let Ok(session) = crate::tls::TlsSession::new_server(server_cfg) {
                        conn_handle.tls = Some(session);
                    }
                }
            }

            // `on_connect` is the loop's generic "fully established"
            // hook — it fires here immediately when there's no TLS to
            // negotiate, or after a successful handshake otherwise, so
            // `on_connection` never sees `Connected` ahead of the
            // handshake completing.
            let established = Arc::new(AtomicBool::new(false));
            let channels_for_connect = channels.clone();
            let callbacks_for_connect = callbacks.clone();
            let established_for_connect = established.clone();
            conn_handle.on_connect = Some(Box::new(move |h| {
                established_for_connect.store(true, Ordering::SeqCst);
                let mut channel = SocketChannel::new(h);
                channel.status = Status::Connected;
                channels_for_connect.lock().unwrap().insert(h.fd, channel);
                if let Some(cb) = &callbacks_for_connect.on_connection {
                    cb(channel);
                }
            }));

            let on_message = callbacks.on_message.clone();
            conn_handle.on_read = Some(Box::new(move |h, data| {
                if let Some(cb) = &on_message {
                    cb(h, data);
                }
            }));

            let on_write_complete = callbacks.on_write_complete.clone();
            conn_handle.on_write = Some(Box::new(move |h| {
                if let Some(cb) = &on_write_complete {
                    cb(h);
                }
            }));

            let channels_for_close = channels.clone();
            let on_connection_for_close = callbacks.on_connection.clone();
            conn_handle.on_close = Some(Box::new(move |_lp, h| {
                channels_for_close.lock().unwrap().shift_remove(&h.fd);
                if established.load(Ordering::SeqCst) {
                    if let Some(cb) = &on_connection_for_close {
                        let mut disconnected = SocketChannel::new(h);
                        disconnected.status = Status::Disconnected;
                        cb(disconnected);
                    }
                }
            }));
        }));

        Ok(())
    }
}
