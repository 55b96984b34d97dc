//! Server error types.

use thiserror::Error;

/// Storage-layer failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database I/O or transaction failure.
    #[error("storage i/o error: {0}")]
    Io(String),
}

/// Errors that can occur in the server.
///
/// Per-connection errors terminate only that connection; listener and
/// storage errors terminate the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration problem (bad bind address, unreadable key file).
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Secure-channel failure on a connection.
    #[error("transport error: {0}")]
    Transport(#[from] murmur_transport::TransportError),

    /// Malformed frame or record from a client.
    #[error("protocol error: {0}")]
    Protocol(#[from] murmur_proto::ProtocolError),

    /// Storage failure.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}
