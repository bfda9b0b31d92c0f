//! # Session Error Types
//!
//! Error kinds raised while handling one accepted connection, whether the
//! connection has reached `ProxySession` yet or is still mid-handshake in
//! the listener. Every variant is caught and logged at the point it
//! occurs — `session::run_session` for session-level errors, the accept
//! loop for a failed TLS handshake — and never propagates into another
//! session or back into the accept loop itself.

use thiserror::Error;

/// Errors that can occur while servicing a single client/backend session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Reading from the client socket failed.
    #[error("client read failed: {0}")]
    ClientRead(#[source] std::io::Error),

    /// Writing to the client socket failed.
    #[error("client write failed: {0}")]
    ClientWrite(#[source] std::io::Error),

    /// Reading from the backend socket failed.
    #[error("server read failed: {0}")]
    ServerRead(#[source] std::io::Error),

    /// Writing to the backend socket failed.
    #[error("server write failed: {0}")]
    ServerWrite(#[source] std::io::Error),

    /// Dialing the backend did not complete within the connect timeout, or
    /// the connection attempt itself failed.
    #[error("failed to connect to backend {host}:{port}: {source}")]
    BackendConnect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The first-chunk HTTP head did not parse as a well-formed request
    /// line plus headers.
    #[error("malformed HTTP head: {0}")]
    MalformedHead(String),

    /// The server-side TLS handshake with the client failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(#[source] std::io::Error),

    /// A caller passed an empty buffer to `write`/`queue`, which is a
    /// programming error rather than a recoverable I/O condition.
    #[error("empty buffer passed to {0}")]
    EmptyBuffer(&'static str),
}
