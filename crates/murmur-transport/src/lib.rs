//! Authenticated fixed-size frame transport.
//!
//! A thin secure channel over TCP: a three-message X25519 handshake that
//! authenticates the server by its static key and yields the client's
//! static public key as the peer identity (the mailbox UID), then a stream
//! of uniformly sized AEAD frames in each direction.
//!
//! Every frame carries exactly `frame_size` plaintext bytes; callers pad
//! records to that size before writing. On the wire each frame is
//! `frame_size + 16` bytes and nothing else: no length prefixes, no
//! variable records, so traffic is length-indistinguishable above the TCP
//! layer.
//!
//! # Handshake
//!
//! ```text
//! client -> server: e_pub(32) || nonce(24) || box(e -> S){client static pub}
//! server -> client: f_pub(32)
//! ```
//!
//! Both sides derive directional keys from
//! `HKDF(DH(e,f) || DH(client_static,f) || DH(e,S))`. The server proves
//! possession of `S` by opening the hello box and deriving `DH(e,S)`; the
//! client proves possession of its claimed static key via
//! `DH(client_static,f)`. An impostor on either side derives different
//! keys and the first frame fails to authenticate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod framed;
mod handshake;

pub use error::TransportError;
pub use framed::{FrameReader, FrameWriter, READ_DEADLINE};
pub use handshake::{client_handshake, server_handshake};

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
