//! Component F — `TcpClient`, grounded in `demo_tcp_client.cpp` (the
//! only surviving trace of `TcpClient.hpp` in the retrieved sources)
//! plus `Channel.hpp`'s `SocketChannel::startConnect`/`onconnect`.
//! Reconnects on disconnect per a [`ReconnectPolicy`], mirroring the
//! demo's "1,2,4,8,10,10,10..." exponential-with-ceiling schedule.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::channel::{SocketChannel, Status};
use crate::error::Result;
use crate::evloop::Loop;
use crate::handle::{Handle, IoType};
use crate::tls::TlsConfig;

/// Matches the core's default connect-timeout.
const DEFAULT_CONNECT_TIMEOUT_US: u64 = 5_000_000;

#[derive(Debug, Clone, Copy)]
pub enum ReconnectPolicy {
    /// Retries forever at a fixed delay.
    Fixed(Duration),
    /// Doubles the delay after each failure, capped at `max`.
    Exponential { min: Duration, max: Duration },
    /// Never reconnects automatically.
    Never,
}

impl ReconnectPolicy {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::Fixed(d) => Some(d),
            ReconnectPolicy::Exponential { min, max } => {
                let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
                let scaled = min.saturating_mul(factor as u32);
                Some(scaled.min(max))
            }
        }
    }
}

#[derive(Clone)]
struct Callbacks {
    on_connection: Option<Arc<dyn Fn(SocketChannel) + Send + Sync>>,
    on_message: Option<Arc<dyn Fn(&mut Handle, &[u8]) + Send + Sync>>,
    on_write_complete: Option<Arc<dyn Fn(&mut Handle) + Send + Sync>>,
}

impl Default for Callbacks {
    fn default() -> Callbacks {
        Callbacks { on_connection: None, on_message: None, on_write_complete: None }
    }
}

pub struct TcpClient {
    addr: SocketAddr,
    reconnect: ReconnectPolicy,
    connect_timeout_us: u64,
    tls: Option<Arc<TlsConfig>>,
    server_name: Option<String>,
    attempt: Arc<Mutex<u32>>,
    callbacks: Callbacks,
}

impl TcpClient {
    pub fn new<A: ToSocketAddrs>(addr: A) -> Result<TcpClient> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| crate::error::Error::InvalidArgument("no address resolved".into()))?;

        Ok(TcpClient {
            addr,
            reconnect: ReconnectPolicy::Never,
            connect_timeout_us: DEFAULT_CONNECT_TIMEOUT_US,
            tls: None,
            server_name: None,
            attempt: Arc::new(Mutex::new(0)),
            callbacks: Callbacks::default(),
        })
    }

    pub fn set_reconnect(&mut self, policy: ReconnectPolicy) {
        self.reconnect = policy;
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout_us = timeout.as_micros() as u64;
    }

    pub fn with_tls(&mut self, cfg: TlsConfig, server_name: impl Into<String>) {
        self.tls = Some(Arc::new(cfg));
        self.server_name = Some(server_name.into());
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

    /// Starts (or restarts, after a disconnect) the connect attempt.
    pub fn start(&self, lp: &mut Loop) -> Result<()> {
        self.connect_once(lp)
    }

    /// Issues a nonblocking connect and wires callbacks. `on_connection`
    /// fires with `Connected` once the connect completes and, if TLS is
    /// configured, the handshake finishes — never synchronously here,
    /// matching the original's `io_connect`/`connect_cb` split.
    fn connect_once(&self, lp: &mut Loop) -> Result<()> {
        let fd = match lp.connect_async(self.addr, IoType::Tcp, 0, self.connect_timeout_us) {
            Ok(fd) => fd,
            Err(_) => {
                self.schedule_retry(lp);
                return Ok(());
            }
        };

        let handle = lp.handles_mut().get_mut(fd).expect("just registered");
        let callbacks = self.callbacks.clone();

        // Attached synchronously, before the connect even completes, so
        // the loop sees `handle.tls` in place the moment it decides
        // whether to defer `on_connect` behind a handshake.
        if let Some(cfg) = &self.tls {
            if let (Some(client_cfg), Some(name)) = (cfg.client.clone(), self.server_name.as_deref()) {
                if let Ok(session) = crate::tls::TlsSession::new_client(client_cfg, name) {
                    handle.tls = Some(session);
                }
            }
        }

        // `on_connect` fires once the connection is fully established —
        // immediately for plaintext, after a successful handshake for
        // TLS — so `on_connection` never reports `Connected` ahead of
        // the handshake completing.
        let established = Arc::new(AtomicBool::new(false));
        let on_connection_for_connect = callbacks.on_connection.clone();
        let attempt_for_connect = self.attempt.clone();
        let established_for_connect = established.clone();
        handle.on_connect = Some(Box::new(move |h| {
            established_for_connect.store(true, Ordering::SeqCst);
            if let Some(cb) = &on_connection_for_connect {
                let mut connected = SocketChannel::new(h);
                connected.status = Status::Connected;
                cb(connected);
            }
            *attempt_for_connect.lock().unwrap() = 0;
        }));

        let on_message = callbacks.on_message.clone();
        handle.on_read = Some(Box::new(move |h, data| {
            if let Some(cb) = &on_message {
                cb(h, data);
            }
        }));

        let on_write_complete = callbacks.on_write_complete.clone();
        handle.on_write = Some(Box::new(move |h| {
            if let Some(cb) = &on_write_complete {
                cb(h);
            }
        }));

        let reconnect = self.reconnect;
        let connect_timeout_us = self.connect_timeout_us;
        let attempt = self.attempt.clone();
        let retry_addr = self.addr;
        let retry_tls = self.tls.clone();
        let retry_server_name = self.server_name.clone();
        let retry_callbacks = self.callbacks.clone();
        let on_connection_for_close = callbacks.on_connection.clone();
        handle.on_close = Some(Box::new(move |lp, h| {
            if established.load(Ordering::SeqCst) {
                if let Some(cb) = &on_connection_for_close {
                    let mut disconnected = SocketChannel::new(h);
                    disconnected.status = Status::Disconnected;
                    cb(disconnected);
                }
            }

            let client = TcpClient {
                addr: retry_addr,
                reconnect,
                connect_timeout_us,
                tls: retry_tls.clone(),
                server_name: retry_server_name.clone(),
                attempt: attempt.clone(),
                callbacks: retry_callbacks.clone(),
            };
            client.schedule_retry(lp);
        }));

        Ok(())
    }

    fn schedule_retry(&self, lp: &mut Loop) {
        let mut attempt = self.attempt.lock().unwrap();
        let Some(delay) = self.reconnect.next_delay(*attempt) else { return };
        *attempt += 1;
        drop(attempt);

        let addr = self.addr;
        let reconnect = self.reconnect;
        let connect_timeout_us = self.connect_timeout_us;
        let tls = self.tls.clone();
        let server_name = self.server_name.clone();
        let callbacks = self.callbacks.clone();
        let attempt_handle = self.attempt.clone();

        lp.timer_add(delay.as_micros() as u64, 1, move |lp, _id| {
            let client = TcpClient {
                addr,
                reconnect,
                connect_timeout_us,
                tls: tls.clone(),
                server_name: server_name.clone(),
                attempt: attempt_handle.clone(),
                callbacks: callbacks.clone(),
            };
            let _ = client.connect_once(lp);
        });
    }
}
