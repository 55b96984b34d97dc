//! The local prekey pool.
//!
//! Each entry pairs a published X25519 public half with the secret needed
//! to accept a first contact sealed to it. Entries are consumed exactly
//! once; generation appends, consumption removes, and the pool file is
//! rewritten atomically around both.
//!
//! Top-up ordering is crash-safe by construction: new secrets reach disk
//! before their signed publics reach the server. A server holding a signed
//! public whose secret was lost merely wastes one first-contact attempt.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

/// One unconsumed prekey.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrekeyPair {
    /// Published half; appears in first-contact envelope prologues.
    pub public: [u8; 32],
    /// Secret half, needed exactly once.
    pub secret: [u8; 32],
}

/// The set of prekeys whose secrets we still hold.
#[derive(Default, Serialize, Deserialize)]
pub struct PrekeyPool {
    pairs: Vec<PrekeyPair>,
}

impl PrekeyPool {
    /// Number of unconsumed prekeys.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when no prekeys remain.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Generate `n` fresh pairs, returning the new public halves for
    /// signing and upload.
    pub fn generate_into(
        &mut self,
        n: usize,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Vec<[u8; 32]> {
        let mut publics = Vec::with_capacity(n);
        for _ in 0..n {
            let secret = StaticSecret::random_from_rng(&mut *rng);
            let public = PublicKey::from(&secret).to_bytes();
            publics.push(public);
            self.pairs.push(PrekeyPair { public, secret: secret.to_bytes() });
        }
        publics
    }

    /// The pair published under `public`, if unconsumed.
    pub fn find(&self, public: &[u8; 32]) -> Option<&PrekeyPair> {
        self.pairs.iter().find(|pair| &pair.public == public)
    }

    /// Consume the pair published under `public`.
    pub fn remove(&mut self, public: &[u8; 32]) -> Option<PrekeyPair> {
        let idx = self.pairs.iter().position(|pair| &pair.public == public)?;
        Some(self.pairs.remove(idx))
    }
}
