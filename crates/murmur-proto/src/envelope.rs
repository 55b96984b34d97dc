//! Envelope identity and the first-contact prologue.
//!
//! The sealed envelope layout belongs to the ratchet; what is fixed here is
//! the part other components need to see without decrypting: first-contact
//! envelopes open with a 64-byte prologue of `recipient prekey pub ||
//! sender ratchet pub`, and every envelope's identity is the SHA-256 of its
//! full bytes.

use sha2::{Digest, Sha256};

use crate::{ProtocolError, Result};

/// Length of the first-contact prologue.
pub const ENVELOPE_PROLOGUE_LEN: usize = 64;

/// The cleartext prologue of a first-contact envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHead {
    /// The recipient prekey this envelope was sealed to. Receivers match
    /// this against their local pool; no match means the envelope is a
    /// continuation (or sealed to an already-consumed prekey).
    pub prekey_pub: [u8; 32],
    /// The sender's initial ratchet public key.
    pub ratchet_pub: [u8; 32],
}

impl EnvelopeHead {
    /// Parse the prologue of `envelope`.
    pub fn parse(envelope: &[u8]) -> Result<Self> {
        if envelope.len() < ENVELOPE_PROLOGUE_LEN {
            return Err(ProtocolError::ShortInput {
                need: ENVELOPE_PROLOGUE_LEN,
                have: envelope.len(),
            });
        }
        let mut prekey_pub = [0u8; 32];
        let mut ratchet_pub = [0u8; 32];
        prekey_pub.copy_from_slice(&envelope[..32]);
        ratchet_pub.copy_from_slice(&envelope[32..64]);
        Ok(Self { prekey_pub, ratchet_pub })
    }
}

/// An envelope's identity: SHA-256 over its full bytes.
///
/// Delivery is idempotent under this identity; depositing the same bytes
/// twice leaves one stored copy.
pub fn envelope_id(envelope: &[u8]) -> [u8; 32] {
    Sha256::digest(envelope).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extracts_prologue() {
        let mut envelope = vec![0u8; 128];
        envelope[..32].copy_from_slice(&[1; 32]);
        envelope[32..64].copy_from_slice(&[2; 32]);
        let head = EnvelopeHead::parse(&envelope).unwrap();
        assert_eq!(head.prekey_pub, [1; 32]);
        assert_eq!(head.ratchet_pub, [2; 32]);
    }

    #[test]
    fn short_envelope_rejected() {
        assert!(matches!(
            EnvelopeHead::parse(&[0u8; 63]),
            Err(ProtocolError::ShortInput { need: 64, have: 63 })
        ));
    }

    #[test]
    fn id_is_stable() {
        let envelope = vec![7u8; 100];
        assert_eq!(envelope_id(&envelope), envelope_id(&envelope));
        assert_ne!(envelope_id(&envelope), envelope_id(&[7u8; 99]));
    }
}
