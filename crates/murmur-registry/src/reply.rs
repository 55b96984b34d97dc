//! Signed lookup replies and their verification.
//!
//! A [`LookupReply`] binds `(name, profile, timestamp)` under the registry's
//! Ed25519 key. Senders embed the reply in their first message so the
//! recipient can check the binding offline; the recipient's [`Verifier`]
//! decides how old a reply it is willing to accept.

use std::time::Duration;

use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{Profile, RegistryError};

/// Domain separator for reply signatures.
const REPLY_CONTEXT: &[u8] = b"murmur-registry-lookup-v1";

/// Default freshness window for live verification.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(60 * 60 * 24);

/// A registry's signed answer to a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupReply {
    /// The name the reply attests to.
    pub name: String,
    /// CBOR-encoded [`Profile`] bound to the name.
    pub profile_bytes: Vec<u8>,
    /// Registry clock at signing time, Unix seconds.
    pub unix_seconds: i64,
    /// Ed25519 signature over the reply transcript.
    pub signature: Vec<u8>,
}

impl LookupReply {
    /// The byte string the registry signs.
    ///
    /// Length-prefixing the name keeps the transcript unambiguous.
    pub fn transcript(name: &str, profile_bytes: &[u8], unix_seconds: i64) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            REPLY_CONTEXT.len() + 8 + name.len() + 8 + profile_bytes.len(),
        );
        out.extend_from_slice(REPLY_CONTEXT);
        out.extend_from_slice(&(name.len() as u64).to_be_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&unix_seconds.to_be_bytes());
        out.extend_from_slice(profile_bytes);
        out
    }

    /// CBOR-encode the reply.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RegistryError> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| RegistryError::Encoding(e.to_string()))?;
        Ok(out)
    }

    /// Decode a CBOR-encoded reply.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RegistryError> {
        ciborium::from_reader(bytes).map_err(|e| RegistryError::Encoding(e.to_string()))
    }
}

/// Checks lookup replies against the registry key and a freshness window.
///
/// `freshness: None` builds the timeless verifier: signature and name
/// binding are still enforced, age is not. That mode backs the cached-peer
/// path, where a stale-but-genuine reply is acceptable evidence.
#[derive(Debug, Clone)]
pub struct Verifier {
    registry_pub: [u8; 32],
    freshness: Option<Duration>,
}

impl Verifier {
    /// Verifier with an explicit freshness window.
    pub fn new(registry_pub: [u8; 32], freshness: Duration) -> Self {
        Self { registry_pub, freshness: Some(freshness) }
    }

    /// Verifier that accepts replies of any age.
    pub fn timeless(registry_pub: [u8; 32]) -> Self {
        Self { registry_pub, freshness: None }
    }

    /// Verify `reply` as an attestation for `name` as of `now_unix`.
    ///
    /// Returns the decoded profile on success.
    pub fn verify(
        &self,
        name: &str,
        reply: &LookupReply,
        now_unix: i64,
    ) -> Result<Profile, RegistryError> {
        if reply.name != name {
            return Err(RegistryError::WrongName {
                got: reply.name.clone(),
                want: name.to_string(),
            });
        }

        let key = VerifyingKey::from_bytes(&self.registry_pub)
            .map_err(|_| RegistryError::BadSignature)?;
        let sig_bytes: [u8; 64] =
            reply.signature.as_slice().try_into().map_err(|_| RegistryError::BadSignature)?;
        let sig = Signature::from_bytes(&sig_bytes);

        let transcript =
            LookupReply::transcript(&reply.name, &reply.profile_bytes, reply.unix_seconds);
        key.verify(&transcript, &sig).map_err(|_| RegistryError::BadSignature)?;

        if let Some(window) = self.freshness {
            let age = now_unix.saturating_sub(reply.unix_seconds);
            let limit = window.as_secs() as i64;
            if age > limit {
                return Err(RegistryError::Stale { age_secs: age, limit_secs: limit });
            }
        }

        Profile::from_bytes(&reply.profile_bytes)
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    use super::*;

    fn signed_reply(key: &SigningKey, name: &str, at: i64) -> LookupReply {
        let profile = Profile { version: 1, fields: std::collections::BTreeMap::new() };
        let profile_bytes = profile.to_bytes().unwrap();
        let sig = key.sign(&LookupReply::transcript(name, &profile_bytes, at));
        LookupReply {
            name: name.to_string(),
            profile_bytes,
            unix_seconds: at,
            signature: sig.to_bytes().to_vec(),
        }
    }

    #[test]
    fn fresh_reply_verifies() {
        let key = SigningKey::generate(&mut OsRng);
        let verifier = Verifier::new(key.verifying_key().to_bytes(), DEFAULT_FRESHNESS);
        let reply = signed_reply(&key, "alice", 1_000_000);
        assert!(verifier.verify("alice", &reply, 1_000_100).is_ok());
    }

    #[test]
    fn stale_reply_rejected_unless_timeless() {
        let key = SigningKey::generate(&mut OsRng);
        let reply = signed_reply(&key, "alice", 0);
        let now = DEFAULT_FRESHNESS.as_secs() as i64 + 10;

        let fresh = Verifier::new(key.verifying_key().to_bytes(), DEFAULT_FRESHNESS);
        assert!(matches!(fresh.verify("alice", &reply, now), Err(RegistryError::Stale { .. })));

        let timeless = Verifier::timeless(key.verifying_key().to_bytes());
        assert!(timeless.verify("alice", &reply, now).is_ok());
    }

    #[test]
    fn wrong_name_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let verifier = Verifier::timeless(key.verifying_key().to_bytes());
        let reply = signed_reply(&key, "alice", 0);
        assert!(matches!(
            verifier.verify("bob", &reply, 0),
            Err(RegistryError::WrongName { .. })
        ));
    }

    #[test]
    fn tampered_profile_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let verifier = Verifier::timeless(key.verifying_key().to_bytes());
        let mut reply = signed_reply(&key, "alice", 0);
        reply.profile_bytes.push(0);
        assert!(matches!(verifier.verify("alice", &reply, 0), Err(RegistryError::BadSignature)));
    }

    #[test]
    fn wrong_registry_key_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let verifier = Verifier::timeless(other.verifying_key().to_bytes());
        let reply = signed_reply(&key, "alice", 0);
        assert!(matches!(verifier.verify("alice", &reply, 0), Err(RegistryError::BadSignature)));
    }
}
