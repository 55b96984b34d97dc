//! Daemon error types.
//!
//! Inside the engine's main loop, almost every error is fatal on purpose:
//! local corruption or a dead home-server connection must stop the daemon
//! rather than let state silently diverge. The exception is an inbound
//! envelope no session can open -- a remote peer can always send garbage,
//! so that is logged and skipped.

use thiserror::Error;

/// Errors from the daemon engine and its support modules.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Local filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Secure-channel failure.
    #[error("transport error: {0}")]
    Transport(#[from] murmur_transport::TransportError),

    /// Record encoding/decoding failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] murmur_proto::ProtocolError),

    /// Session-layer failure.
    #[error("session error: {0}")]
    Session(#[from] murmur_crypto::RatchetError),

    /// Registry failure.
    #[error("registry error: {0}")]
    Registry(#[from] murmur_registry::RegistryError),

    /// The account configuration is missing or unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server answered a command with its failure status.
    #[error("server rejected {0}")]
    ServerRejected(&'static str),

    /// The connection to a server ended.
    #[error("server connection closed")]
    Disconnected,

    /// The peer's home server has no prekeys left for them.
    #[error("no prekeys available for {0}")]
    PrekeysExhausted(String),

    /// An inbound envelope matched no prekey and no session.
    #[error("envelope matched no prekey and no session")]
    Undecryptable,

    /// The outbox watcher failed.
    #[error("watcher error: {0}")]
    Watch(String),

    /// A peer name is not usable as a filesystem path component.
    #[error("unusable peer name {0:?}")]
    BadName(String),
}
