//! A single-threaded reactor event loop for building TCP/UDP/TLS
//! services, with an optional thread pool for scaling the accept side
//! across cores.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! reo = "0.1"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use reo::{Loop, TcpServer};
//!
//! let mut lp = Loop::new().unwrap();
//! let mut server = TcpServer::bind("127.0.0.1:13265").unwrap();
//!
//! server.on_message(|channel, data| {
//!     println!("got {} bytes from fd {}", data.len(), channel.fd());
//! });
//!
//! server.attach(&mut lp).unwrap();
//! lp.run().unwrap();
//! ```

extern crate libc;
extern crate indexmap;
extern crate slab;
extern crate concurrent_queue;
extern crate rustls;
extern crate rustls_pemfile;
extern crate thiserror;
#[macro_use]
extern crate log;

pub(crate) mod sys;

pub mod channel;
pub mod client;
pub mod collections;
pub mod error;
pub mod evloop;
pub mod event;
pub mod handle;
pub mod net;
pub mod server;
pub mod thread_pool;
pub mod time;
pub mod timer;
pub mod tls;
pub mod udp_channel;
pub mod watcher;

pub use channel::{Channel, SocketChannel};
pub use client::TcpClient;
pub use error::{Error, Result};
pub use evloop::{Loop, LoopConfig, LoopFlags, LoopHandle, Status};
pub use handle::{Handle, IoType};
pub use server::TcpServer;
pub use thread_pool::{EventLoopThread, EventLoopThreadPool};
pub use udp_channel::{UdpClient, UdpServer};
pub use watcher::{Interest, RawEvent};
