//! Murmur wire records and framing.
//!
//! Everything that crosses a socket or is hashed for identity is defined
//! here: the fixed frame sizes and the padding that makes every record
//! length-indistinguishable, the client/server command records and their
//! tagged decode, the [`Message`] record peers exchange inside envelopes,
//! the envelope head layout, and the signed-prekey encoding.
//!
//! Structured records are CBOR (self-describing, no code generation); the
//! envelope head and padding operate on raw bytes because their layout is
//! part of the cryptographic framing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod errors;
mod message;
mod padding;
mod prekeys;
mod wire;

pub use envelope::{ENVELOPE_PROLOGUE_LEN, EnvelopeHead, envelope_id};
pub use errors::ProtocolError;
pub use message::{ConversationMetadata, Message};
pub use padding::{pad, pad_into, unpad};
pub use prekeys::{SIGNED_PREKEY_LEN, sign_prekeys, verify_signed_prekey};
pub use wire::{ClientCommand, Command, DeliverEnvelope, ServerReply, Status};

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// A mailbox owner as the server knows it: the 32-byte transport public
/// key authenticated at handshake time.
pub type Uid = [u8; 32];

/// Fixed plaintext size of every client <-> server command frame.
pub const SERVER_FRAME_SIZE: usize = 4096;

/// Fixed size of every peer-to-peer envelope.
pub const MAX_MESSAGE_SIZE: usize = 16384;
