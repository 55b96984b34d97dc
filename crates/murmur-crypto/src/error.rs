//! Session error taxonomy.

use thiserror::Error;

/// Errors from session encrypt/decrypt and state persistence.
///
/// During inbound classification, `MacMismatch` and `AeadFailure` are
/// expected outcomes: they mean "not this session" and drive the caller to
/// the next candidate. Only exhausting every candidate makes them an error
/// worth surfacing.
#[derive(Debug, Error)]
pub enum RatchetError {
    /// The envelope's auth tag does not match the peer identity this
    /// session is bound to. Also the signal for peer identity rotation.
    #[error("envelope auth tag did not verify against the peer's auth key")]
    MacMismatch,

    /// Authenticated decryption failed.
    #[error("envelope ciphertext failed to open")]
    AeadFailure,

    /// The envelope is too short to carry the claimed structure.
    #[error("envelope too short: need {need} bytes, have {have}")]
    ShortInput {
        /// Minimum length required.
        need: usize,
        /// Length actually available.
        have: usize,
    },

    /// The claimed sender name could not be resolved to a profile.
    #[error("no profile for sender {0:?}")]
    UnknownProfile(String),

    /// The sender's identity evidence is too old to accept.
    #[error("profile evidence for {0:?} is stale")]
    ProfileStale(String),

    /// The envelope is outside the skipped-key window: too far ahead to
    /// derive, or behind a key that was never stored.
    #[error("message counter {counter} outside the out-of-order window")]
    OutOfOrder {
        /// Counter carried by the offending envelope.
        counter: u32,
    },

    /// A message does not fit in the fixed envelope size.
    #[error("message of {len} bytes exceeds envelope capacity {max}")]
    Oversize {
        /// Plaintext record length.
        len: usize,
        /// Maximum plaintext the envelope can carry.
        max: usize,
    },

    /// Session state or message record failed to encode or decode.
    #[error("session encoding error: {0}")]
    Encoding(String),
}

impl From<murmur_proto::ProtocolError> for RatchetError {
    fn from(err: murmur_proto::ProtocolError) -> Self {
        match err {
            murmur_proto::ProtocolError::Oversize { len, frame_size } => {
                RatchetError::Oversize { len, max: frame_size }
            }
            murmur_proto::ProtocolError::ShortInput { need, have } => {
                RatchetError::ShortInput { need, have }
            }
            murmur_proto::ProtocolError::BadPadding => RatchetError::AeadFailure,
            other => RatchetError::Encoding(other.to_string()),
        }
    }
}
