//! In-process registry implementations.
//!
//! [`InProcessRegistry`] is a complete registry living behind an
//! `Arc<Mutex<..>>`: tests and demos register profiles into it and hand
//! clones to every party. [`OfflineRegistry`] answers nothing and backs
//! deployments where resolution must come from embedded proofs and the
//! local cache alone.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use crate::{LookupReply, Profile, Registry, RegistryError};

struct Inner {
    signing: SigningKey,
    profiles: BTreeMap<String, Profile>,
}

/// A registry held entirely in memory, shared by cloning.
#[derive(Clone)]
pub struct InProcessRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl InProcessRegistry {
    /// Create a registry with a fresh signing key.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                signing: SigningKey::generate(&mut OsRng),
                profiles: BTreeMap::new(),
            })),
        }
    }

    /// The registry's verifying key, for building [`crate::Verifier`]s.
    pub fn public_key(&self) -> [u8; 32] {
        self.lock().signing.verifying_key().to_bytes()
    }

    /// Register or replace the profile for `name`, bumping its version.
    pub fn register(&self, name: &str, mut profile: Profile) {
        let mut inner = self.lock();
        let version =
            inner.profiles.get(name).map_or(1, |existing| existing.version + 1);
        profile.version = version;
        tracing::debug!(name, version, "registry profile updated");
        inner.profiles.insert(name.to_string(), profile);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned registry mutex means a test harness already panicked.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for InProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for InProcessRegistry {
    fn lookup(&self, name: &str) -> Result<(Profile, LookupReply), RegistryError> {
        let inner = self.lock();
        let profile = inner
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownName(name.to_string()))?;

        let profile_bytes = profile.to_bytes()?;
        let unix_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64);
        let sig = inner
            .signing
            .sign(&LookupReply::transcript(name, &profile_bytes, unix_seconds));

        let reply = LookupReply {
            name: name.to_string(),
            profile_bytes,
            unix_seconds,
            signature: sig.to_bytes().to_vec(),
        };
        Ok((profile, reply))
    }
}

/// A registry that answers every lookup with `UnknownName`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRegistry;

impl Registry for OfflineRegistry {
    fn lookup(&self, name: &str) -> Result<(Profile, LookupReply), RegistryError> {
        Err(RegistryError::UnknownName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::Verifier;

    #[test]
    fn lookup_round_trip_verifies() {
        let registry = InProcessRegistry::new();
        registry.register("alice", Profile::default());

        let (profile, reply) = registry.lookup("alice").unwrap();
        assert_eq!(profile.version, 1);

        let verifier = Verifier::new(registry.public_key(), Duration::from_secs(60));
        let verified = verifier.verify("alice", &reply, reply.unix_seconds).unwrap();
        assert_eq!(verified, profile);
    }

    #[test]
    fn reregistration_bumps_version() {
        let registry = InProcessRegistry::new();
        registry.register("alice", Profile::default());
        registry.register("alice", Profile::default());
        let (profile, _) = registry.lookup("alice").unwrap();
        assert_eq!(profile.version, 2);
    }

    #[test]
    fn unknown_name_errors() {
        let registry = InProcessRegistry::new();
        assert!(matches!(
            registry.lookup("nobody"),
            Err(RegistryError::UnknownName(_))
        ));
        assert!(matches!(
            OfflineRegistry.lookup("nobody"),
            Err(RegistryError::UnknownName(_))
        ));
    }
}
