//! Signed-prekey encoding.
//!
//! A prekey travels as `x25519 pub (32) || ed25519 signature (64)`. The
//! owner signs each public half with their long-term signing key before
//! upload; senders verify against the signing key published in the owner's
//! profile before trusting a prekey a server handed them.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::{ProtocolError, Result};

/// Encoded length of one signed prekey.
pub const SIGNED_PREKEY_LEN: usize = 32 + 64;

/// Sign each prekey public half, producing upload-ready encodings.
pub fn sign_prekeys(publics: &[[u8; 32]], signing: &SigningKey) -> Vec<Vec<u8>> {
    publics
        .iter()
        .map(|public| {
            let sig = signing.sign(public);
            let mut out = Vec::with_capacity(SIGNED_PREKEY_LEN);
            out.extend_from_slice(public);
            out.extend_from_slice(&sig.to_bytes());
            out
        })
        .collect()
}

/// Verify a signed prekey and return its public half.
pub fn verify_signed_prekey(signed: &[u8], signing_pub: &[u8; 32]) -> Result<[u8; 32]> {
    if signed.len() != SIGNED_PREKEY_LEN {
        return Err(ProtocolError::BadPrekeyLength(signed.len()));
    }
    let mut public = [0u8; 32];
    public.copy_from_slice(&signed[..32]);
    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(&signed[32..]);

    let key = VerifyingKey::from_bytes(signing_pub)
        .map_err(|_| ProtocolError::BadPrekeySignature)?;
    key.verify(&public, &Signature::from_bytes(&sig_bytes))
        .map_err(|_| ProtocolError::BadPrekeySignature)?;
    Ok(public)
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let signing = SigningKey::generate(&mut OsRng);
        let publics = [[1u8; 32], [2u8; 32]];
        let signed = sign_prekeys(&publics, &signing);
        assert_eq!(signed.len(), 2);
        for (encoded, public) in signed.iter().zip(publics) {
            assert_eq!(encoded.len(), SIGNED_PREKEY_LEN);
            let verifying = signing.verifying_key().to_bytes();
            assert_eq!(verify_signed_prekey(encoded, &verifying).unwrap(), public);
        }
    }

    #[test]
    fn wrong_signer_rejected() {
        let signing = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let signed = sign_prekeys(&[[3u8; 32]], &signing);
        assert!(matches!(
            verify_signed_prekey(&signed[0], &other.verifying_key().to_bytes()),
            Err(ProtocolError::BadPrekeySignature)
        ));
    }

    #[test]
    fn truncated_encoding_rejected() {
        let signing = SigningKey::generate(&mut OsRng);
        let signed = sign_prekeys(&[[4u8; 32]], &signing);
        assert!(matches!(
            verify_signed_prekey(&signed[0][..95], &signing.verifying_key().to_bytes()),
            Err(ProtocolError::BadPrekeyLength(95))
        ));
    }
}
