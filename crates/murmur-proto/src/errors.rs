//! Protocol error type.

use thiserror::Error;

/// Errors from padding, record encode/decode, and envelope parsing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Input does not fit in the fixed frame after padding.
    #[error("input of {len} bytes exceeds the {frame_size}-byte frame")]
    Oversize {
        /// Unpadded input length.
        len: usize,
        /// Frame the input had to fit in.
        frame_size: usize,
    },

    /// Padded buffer does not end in `0x80` followed by zeros.
    #[error("padding terminator missing")]
    BadPadding,

    /// Input is shorter than the structure being parsed.
    #[error("input too short: need {need} bytes, have {have}")]
    ShortInput {
        /// Minimum length required.
        need: usize,
        /// Length actually available.
        have: usize,
    },

    /// CBOR encoding failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A command record populated zero or more than one verb.
    #[error("command record populates {0} verbs, expected exactly one")]
    AmbiguousCommand(usize),

    /// A signed prekey is not `pub || sig` sized.
    #[error("signed prekey has length {0}, expected 96")]
    BadPrekeyLength(usize),

    /// A signed prekey's signature does not verify.
    #[error("prekey signature did not verify")]
    BadPrekeySignature,
}
