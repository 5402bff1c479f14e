//! TLS provider collaborator: a small reentrant handshake state machine
//! layered on an existing fd, backed by `rustls`.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};
use std::sync::Arc;

use rustls::{ClientConnection, ServerConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    Ok,
    WantRead,
    WantWrite,
    Err,
}

#[derive(Clone)]
pub struct TlsConfig {
    pub server: Option<Arc<rustls::ServerConfig>>,
    pub client: Option<Arc<rustls::ClientConfig>>,
}

impl TlsConfig {
    pub fn server_from_pem(cert_path: &str, key_path: &str) -> crate::error::Result<TlsConfig> {
        let certs = load_certs(cert_path)?;
        let key = load_key(key_path)?;

        let cfg = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| crate::error::Error::Tls(e.to_string()))?;

        Ok(TlsConfig { server: Some(Arc::new(cfg)), client: None })
    }

    pub fn client_insecure_defaults(ca_path: Option<&str>) -> crate::error::Result<TlsConfig> {
        let mut roots = rustls::RootCertStore::empty();
        if let Some(path) = ca_path {
            for cert in load_certs(path)? {
                let _ = roots.add(&cert);
            }
        }

        let cfg = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(TlsConfig { server: None, client: Some(Arc::new(cfg)) })
    }
}

fn load_certs(path: &str) -> crate::error::Result<Vec<rustls::Certificate>> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .map_err(|e| crate::error::Error::Tls(e.to_string()))?;
    Ok(certs.into_iter().map(rustls::Certificate).collect())
}

fn load_key(path: &str) -> crate::error::Result<rustls::PrivateKey> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|e| crate::error::Error::Tls(e.to_string()))?;
    keys.pop()
        .map(rustls::PrivateKey)
        .ok_or_else(|| crate::error::Error::Tls(format!("no private key found in {path}")))
}

enum Conn {
    Server(ServerConnection),
    Client(ClientConnection),
}

/// Wraps one rustls connection over a raw fd. Callers drive `handshake`
/// until it returns `Ok`, then use `read`/`write` exactly like the
/// plaintext path.
pub struct TlsSession {
    conn: Conn,
}

impl TlsSession {
    pub fn new_server(cfg: Arc<rustls::ServerConfig>) -> crate::error::Result<TlsSession> {
        let conn = ServerConnection::new(cfg).map_err(|e| crate::error::Error::Tls(e.to_string()))?;
        Ok(TlsSession { conn: Conn::Server(conn) })
    }

    pub fn new_client(cfg: Arc<rustls::ClientConfig>, name: &str) -> crate::error::Result<TlsSession> {
        let server_name = name
            .try_into()
            .map_err(|_| crate::error::Error::Tls(format!("invalid server name: {name}")))?;
        let conn = ClientConnection::new(cfg, server_name)
            .map_err(|e| crate::error::Error::Tls(e.to_string()))?;
        Ok(TlsSession { conn: Conn::Client(conn) })
    }

    fn with_stream<R>(fd: RawFd, f: impl FnOnce(&mut TcpStream) -> R) -> R {
        let mut stream = unsafe { TcpStream::from_raw_fd(fd) };
        let r = f(&mut stream);
        // Don't let the temporary TcpStream close the real fd on drop;
        // the handle table owns its lifetime.
        let _ = stream.into_raw_fd();
        r
    }

    /// Advances the handshake by one non-blocking I/O attempt.
    pub fn handshake(&mut self, fd: RawFd) -> HandshakeStatus {
        Self::with_stream(fd, |stream| {
            let wants_write = self.is_handshaking_and_wants_write();
            let res = if wants_write {
                self.complete_io_write(stream)
            } else {
                self.complete_io_read(stream)
            };

            match res {
                Ok(()) if !self.is_handshaking() => HandshakeStatus::Ok,
                Ok(()) => HandshakeStatus::WantRead,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if wants_write { HandshakeStatus::WantWrite } else { HandshakeStatus::WantRead }
                }
                Err(_) => HandshakeStatus::Err,
            }
        })
    }

    fn is_handshaking(&self) -> bool {
        match &self.conn {
            Conn::Server(c) => c.is_handshaking(),
            Conn::Client(c) => c.is_handshaking(),
        }
    }

    fn is_handshaking_and_wants_write(&self) -> bool {
        match &self.conn {
            Conn::Server(c) => c.is_handshaking() && c.wants_write(),
            Conn::Client(c) => c.is_handshaking() && c.wants_write(),
        }
    }

    fn complete_io_read(&mut self, stream: &mut TcpStream) -> io::Result<()> {
        match &mut self.conn {
            Conn::Server(c) => c.complete_io(stream),
            Conn::Client(c) => c.complete_io(stream),
        }
        .map(|_| ())
    }

    fn complete_io_write(&mut self, stream: &mut TcpStream) -> io::Result<()> {
        self.complete_io_read(stream)
    }

    pub fn read(&mut self, fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
        Self::with_stream(fd, |stream| match &mut self.conn {
            Conn::Server(c) => {
                c.complete_io(stream)?;
                c.reader().read(buf)
            }
            Conn::Client(c) => {
                c.complete_io(stream)?;
                c.reader().read(buf)
            }
        })
    }

    pub fn write(&mut self, fd: RawFd, buf: &[u8]) -> io::Result<usize> {
        Self::with_stream(fd, |stream| {
            let n = match &mut self.conn {
                Conn::Server(c) => c.writer().write(buf)?,
                Conn::Client(c) => c.writer().write(buf)?,
            };
            match &mut self.conn {
                Conn::Server(c) => c.complete_io(stream)?,
                Conn::Client(c) => c.complete_io(stream)?,
            };
            Ok(n)
        })
    }
}
