//! # Client Errors
//!
//! Purpose: Keep transport failures, framing failures and server-reported
//! errors apart so callers can decide what to retry.
//!
//! ## Design Principles
//! 1. **Single Taxonomy**: One enum covers every failure the client surfaces.
//! 2. **Connection Hygiene**: Each variant knows whether the connection that
//!    produced it can go back to the pool.
//! 3. **Verbatim Server Text**: Server error replies are shown exactly as sent.

use std::io;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not establish a TCP connection within the deadline.
    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The caller's deadline elapsed while acquiring, writing or reading.
    #[error("deadline exceeded")]
    Timeout,

    /// The caller's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Network failure while writing or reading a frame.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Malformed, truncated or unrecognized reply framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error reply (`-...`).
    #[error("{message}")]
    Server { message: String },

    /// Well-formed reply that does not fit the command that was issued.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// The pool was closed; no further connections are handed out.
    #[error("connection pool closed")]
    PoolClosed,

    /// A command needs at least one token.
    #[error("empty command")]
    EmptyCommand,
}

impl ClientError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        ClientError::Protocol(msg.into())
    }

    /// Returns true when the connection that produced this error must not be
    /// reused, because its position relative to frame boundaries is unknown.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            ClientError::Server { .. } | ClientError::UnexpectedReply(_) | ClientError::EmptyCommand
        )
    }
}
