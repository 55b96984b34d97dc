//! Long-term identity auth tags.
//!
//! Every envelope carries a 32-byte HMAC-SHA-256 tag keyed by the X25519
//! agreement of the two parties' long-term auth keys. The tag is computed
//! over the envelope with the tag field excluded, and is checked in
//! constant time. This layer is deliberately independent of the session
//! keys: it binds envelopes to registered identities, not to sessions.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{RatchetError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Width of the envelope auth tag.
pub(crate) const AUTH_TAG_LEN: usize = 32;

/// Derive the shared auth key `X25519(our_auth_sk, their_auth_pub)`.
///
/// Symmetric: either party derives the same value from its own secret and
/// the peer's registered public key.
pub fn shared_auth_key(our_auth_sk: &[u8; 32], their_auth_pub: &[u8; 32]) -> [u8; 32] {
    let secret = StaticSecret::from(*our_auth_sk);
    let public = PublicKey::from(*their_auth_pub);
    secret.diffie_hellman(&public).to_bytes()
}

/// Compute the auth tag over `parts` concatenated.
pub(crate) fn auth_tag(shared_auth: &[u8; 32], parts: &[&[u8]]) -> [u8; AUTH_TAG_LEN] {
    let Ok(mut mac) = HmacSha256::new_from_slice(shared_auth) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    for part in parts {
        mac.update(part);
    }
    let digest = mac.finalize().into_bytes();
    let mut tag = [0u8; AUTH_TAG_LEN];
    tag.copy_from_slice(&digest[..AUTH_TAG_LEN]);
    tag
}

/// Verify an auth tag in constant time.
pub(crate) fn verify_auth_tag(
    shared_auth: &[u8; 32],
    parts: &[&[u8]],
    tag: &[u8],
) -> Result<()> {
    let expected = auth_tag(shared_auth, parts);
    if expected[..].ct_eq(tag).into() {
        Ok(())
    } else {
        Err(RatchetError::MacMismatch)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    fn keypair() -> ([u8; 32], [u8; 32]) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        (secret.to_bytes(), public.to_bytes())
    }

    #[test]
    fn shared_key_is_symmetric() {
        let (a_sk, a_pk) = keypair();
        let (b_sk, b_pk) = keypair();
        assert_eq!(shared_auth_key(&a_sk, &b_pk), shared_auth_key(&b_sk, &a_pk));
    }

    #[test]
    fn tag_round_trip() {
        let (a_sk, a_pk) = keypair();
        let (b_sk, b_pk) = keypair();
        let shared = shared_auth_key(&a_sk, &b_pk);
        let tag = auth_tag(&shared, &[b"header", b"body"]);
        let other = shared_auth_key(&b_sk, &a_pk);
        assert!(verify_auth_tag(&other, &[b"header", b"body"], &tag).is_ok());
    }

    #[test]
    fn wrong_peer_key_fails() {
        let (a_sk, _) = keypair();
        let (_, b_pk) = keypair();
        let (c_sk, _) = keypair();
        let tag = auth_tag(&shared_auth_key(&a_sk, &b_pk), &[b"data"]);
        assert!(matches!(
            verify_auth_tag(&shared_auth_key(&c_sk, &b_pk), &[b"data"], &tag),
            Err(RatchetError::MacMismatch)
        ));
    }

    #[test]
    fn tampered_data_fails() {
        let (a_sk, _) = keypair();
        let (_, b_pk) = keypair();
        let shared = shared_auth_key(&a_sk, &b_pk);
        let tag = auth_tag(&shared, &[b"data"]);
        assert!(verify_auth_tag(&shared, &[b"datb"], &tag).is_err());
    }
}
