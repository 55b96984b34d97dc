//! Murmur session cryptography.
//!
//! A [`Ratchet`] is the per-peer session: created by a first-contact send
//! or receive, advanced on every message, persisted between runs. It
//! layers two independent mechanisms:
//!
//! - **Session confidentiality.** A continuous key agreement: fresh X25519
//!   ratchet keys mixed into a root chain, HMAC-advanced send/receive
//!   chains, one-time message keys, and a bounded store of skipped keys so
//!   delivery order inside a session does not matter.
//! - **Sender authenticity.** An HMAC tag over every envelope keyed by
//!   `X25519(our auth key, peer auth key)` — the long-term identities
//!   registered in the name registry, not the session keys. Compromising a
//!   session key does not allow forging envelopes attributable to a named
//!   sender, and a peer whose registered auth key rotates stops verifying.
//!
//! First contact is sealed as a NaCl box to a one-time prekey published by
//! the recipient; the recipient authenticates the claimed sender name
//! through an injected [`ProfileResolver`] before accepting the session.
//!
//! Envelopes are uniformly sized: the plaintext record is padded so every
//! sealed envelope is exactly [`murmur_proto::MAX_MESSAGE_SIZE`] bytes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod error;
mod kdf;
mod ratchet;
mod resolver;
mod skipped;

pub use auth::shared_auth_key;
pub use error::RatchetError;
pub use ratchet::{CONTINUATION_OVERHEAD, FIRST_CONTACT_OVERHEAD, Ratchet};
pub use resolver::ProfileResolver;

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, RatchetError>;
