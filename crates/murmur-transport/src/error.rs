//! Transport error types.

use thiserror::Error;

/// Errors from the handshake and framed channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The liveness deadline elapsed while waiting for a frame.
    #[error("read deadline elapsed")]
    Deadline,

    /// A frame (or the handshake hello) failed to authenticate.
    #[error("frame failed to authenticate")]
    Crypto,

    /// Caller buffer does not match the negotiated frame size.
    #[error("frame has length {len}, expected {expected}")]
    WrongFrameSize {
        /// Length supplied by the caller.
        len: usize,
        /// Frame size negotiated at handshake.
        expected: usize,
    },
}
