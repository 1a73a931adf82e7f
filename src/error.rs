//! Error kinds shared by every layer of the crate.

use std::fmt::Display;
use std::io;

use crate::parser::ParseError;

/// Result whose `Err` variant is [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds reported by the public API.
///
/// These map one-to-one onto the diagnostic categories the core
/// distinguishes: bad inputs, wrong connection role, an operation that is
/// not legal in the connection's current state, oversized encoded headers,
/// protocol violations, capacity limits, and unclassified I/O trouble.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid parameters were passed to a core API.
    #[error("invalid parameters")]
    WrongParams,
    /// The operation is not valid for this connection's role.
    #[error("wrong connection role for operation")]
    WrongConn,
    /// The operation is not permitted in the connection's current state.
    #[error("operation not permitted in current state")]
    WrongState,
    /// The encoded header block exceeds the 64 KiB limit.
    #[error("encoded header too large")]
    HdrTooLarge,
    /// The peer sent bytes violating the HTTP/1.x grammar.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    /// The per-list limit of live timers was reached.
    #[error("timer capacity exhausted")]
    TimerCapacity,
    /// The connection arena is full.
    #[error("connection capacity exhausted")]
    ConnCapacity,
    /// An I/O error outside the non-blocking retry set.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// TLS configuration or session setup failed.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    /// Unclassified failure.
    #[error("general error")]
    General,
}

/// Why a connection was closed, as delivered to the close handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Orderly close: peer finished, user shutdown, or drained flush.
    Success,
    /// TCP or TLS establishment failed or timed out.
    ErrEstablish,
    /// Shutdown did not complete before its deadline or failed.
    ErrShutdown,
    /// Accepting the connection failed.
    ErrAccept,
    /// A write-side socket error.
    ErrWrite,
    /// A read-side socket error.
    ErrRead,
}

impl Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CloseCode::Success => "success",
            CloseCode::ErrEstablish => "establish error",
            CloseCode::ErrShutdown => "shutdown error",
            CloseCode::ErrAccept => "accept error",
            CloseCode::ErrWrite => "write error",
            CloseCode::ErrRead => "read error",
        })
    }
}
