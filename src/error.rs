//! Typed errors for the channel façade (component F). The raw handle and
//! watcher layers keep returning `std::io::Result` the way the teacher's
//! `sys`/`net` modules always have; this enum is the boundary callbacks
//! and public channel constructors surface instead.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("operation timed out")]
    TimedOut,

    #[error("connection rejected: too many connections")]
    MaxConnections,
}

pub type Result<T> = std::result::Result<T, Error>;
