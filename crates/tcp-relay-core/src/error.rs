//! Error types for the tcp-relay service.

use thiserror::Error;

/// Result type alias for tcp-relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which half of the HTTP proxy handshake timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Writing the `CONNECT` request header.
    Write,
    /// Reading the response header.
    Read,
}

impl std::fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakePhase::Write => write!(f, "write request header"),
            HandshakePhase::Read => write!(f, "read response header"),
        }
    }
}

/// Error types that can occur while relaying a session.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid `host:port` address text.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// DNS resolution did not complete in time.
    #[error("resolve {host}:{port} timeout")]
    ResolveTimeout {
        /// Host that was being resolved.
        host: String,
        /// Port of the resolve request.
        port: u16,
    },

    /// DNS resolution failed.
    #[error("resolve {host}:{port} error: {source}")]
    Resolve {
        /// Host that was being resolved.
        host: String,
        /// Port of the resolve request.
        port: u16,
        /// Resolver error.
        source: std::io::Error,
    },

    /// No resolved endpoint accepted the connection.
    #[error("failed to connect to {host}:{port}")]
    Connect {
        /// Host that was being connected to.
        host: String,
        /// Port that was being connected to.
        port: u16,
    },

    /// The HTTP proxy handshake did not complete in time.
    #[error("http-proxy handshake {0} timeout")]
    HandshakeTimeout(HandshakePhase),

    /// The proxy response header did not parse as an HTTP status line.
    #[error("bad HTTP response header")]
    BadHttpResponse,

    /// The proxy answered the `CONNECT` request with a non-200 status.
    #[error("http-proxy CONNECT rejected with status {0}")]
    ConnectRejected(String),
}
