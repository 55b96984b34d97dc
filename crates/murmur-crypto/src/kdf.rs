//! Root and chain key derivation.
//!
//! The root chain advances by HKDF-SHA-256 over each fresh DH output,
//! salted by the previous root key. Send/receive chains advance by
//! HMAC-SHA-256 under fixed labels: one label derives the message key,
//! the other the next chain key, so the two can never collide.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key.
const CHAIN_LABEL: &[u8] = b"chain";

/// Label for deriving a message key.
const MESSAGE_LABEL: &[u8] = b"message";

/// Info string for session root initialization.
const SESSION_INFO: &[u8] = b"murmur-session-root-v1";

/// Info string for root chain advancement.
const ROOT_INFO: &[u8] = b"murmur-ratchet-root-v1";

/// Derive the initial root key from the first-contact shared secret.
pub(crate) fn initial_root(shared_secret: &[u8; 32]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut root = [0u8; 32];
    let Ok(()) = hk.expand(SESSION_INFO, &mut root) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    root
}

/// Advance the root chain with a DH output, yielding the next root key and
/// a fresh chain key.
pub(crate) fn advance_root(root: &[u8; 32], dh_output: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(root.as_slice()), dh_output);
    let mut okm = [0u8; 64];
    let Ok(()) = hk.expand(ROOT_INFO, &mut okm) else {
        unreachable!("64 bytes is a valid HKDF-SHA256 output length");
    };
    let mut next_root = [0u8; 32];
    let mut chain = [0u8; 32];
    next_root.copy_from_slice(&okm[..32]);
    chain.copy_from_slice(&okm[32..]);
    (next_root, chain)
}

fn prf(key: &[u8; 32], label: &[u8]) -> [u8; 32] {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(label);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Derive the message key for the chain's current position.
pub(crate) fn message_key(chain_key: &[u8; 32]) -> [u8; 32] {
    prf(chain_key, MESSAGE_LABEL)
}

/// Derive the next chain key.
pub(crate) fn next_chain_key(chain_key: &[u8; 32]) -> [u8; 32] {
    prf(chain_key, CHAIN_LABEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivations_are_deterministic() {
        let root = [1u8; 32];
        let dh = [2u8; 32];
        assert_eq!(advance_root(&root, &dh), advance_root(&root, &dh));
        assert_eq!(initial_root(&dh), initial_root(&dh));
    }

    #[test]
    fn message_and_chain_keys_differ() {
        let ck = [3u8; 32];
        assert_ne!(message_key(&ck), next_chain_key(&ck));
    }

    #[test]
    fn root_advancement_moves() {
        let root = [1u8; 32];
        let (next, chain) = advance_root(&root, &[2u8; 32]);
        assert_ne!(next, root);
        assert_ne!(next, chain);
    }
}
