//! The profile resolution hook.
//!
//! Binds claimed sender names to auth keys using, in order of preference:
//!
//! 1. A fresh embedded proof (verified within the freshness window) --
//!    accepted and cached.
//! 2. A locally cached reply for that name -- the embedded proof, if any,
//!    must still be internally consistent (timeless verification), then
//!    the cache is trusted. This is what lets a daemon accept messages
//!    from known peers while the registry is unreachable.
//! 3. A live registry lookup with default freshness.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use murmur_crypto::{ProfileResolver, RatchetError};
use murmur_registry::{ChatProfile, LookupReply, Registry, RegistryError, Verifier};

use crate::{AccountConfig, paths::Layout, store};

/// Cache-backed resolver over a live registry client.
pub struct CachedResolver<R: Registry> {
    registry: R,
    fresh: Verifier,
    timeless: Verifier,
    layout: Layout,
}

impl<R: Registry> CachedResolver<R> {
    /// Build the resolver for an account.
    pub fn new(registry: R, config: &AccountConfig, layout: Layout) -> Self {
        let fresh = Verifier::new(
            config.registry_pub,
            Duration::from_secs(config.registry_freshness_secs),
        );
        let timeless = Verifier::timeless(config.registry_pub);
        Self { registry, fresh, timeless, layout }
    }

    /// The live registry client.
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// A fresh signed reply for `name`, for embedding in outgoing
    /// messages. `None` when the registry is unreachable; recipients then
    /// fall back to their own cache or lookup.
    pub fn lookup_proof(&self, name: &str) -> Option<LookupReply> {
        match self.registry.lookup(name) {
            Ok((_, reply)) => Some(reply),
            Err(err) => {
                tracing::debug!(name, %err, "no live proof available");
                None
            }
        }
    }

    fn cache(&self, name: &str, reply: &LookupReply) {
        if let Err(err) = store::store_profile_reply(&self.layout, name, reply) {
            tracing::warn!(name, %err, "failed to cache registry reply");
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs() as i64)
}

fn registry_err(name: &str, err: &RegistryError) -> RatchetError {
    match err {
        RegistryError::Stale { .. } => RatchetError::ProfileStale(name.to_string()),
        _ => RatchetError::UnknownProfile(name.to_string()),
    }
}

impl<R: Registry> ProfileResolver for CachedResolver<R> {
    fn resolve(
        &mut self,
        name: &str,
        embedded_proof: Option<&LookupReply>,
    ) -> murmur_crypto::Result<ChatProfile> {
        let now = now_unix();

        // Case 1: the embedded proof stands on its own.
        if let Some(proof) = embedded_proof {
            if let Ok(profile) = self.fresh.verify(name, proof, now) {
                let chat = ChatProfile::extract(&profile)
                    .map_err(|err| registry_err(name, &err))?;
                self.cache(name, proof);
                return Ok(chat);
            }
        }

        // Case 2: a known peer; the cache carries the binding. An embedded
        // proof still has to be a genuine registry statement, however old.
        if let Ok(Some(cached)) = store::load_profile_reply(&self.layout, name) {
            if let Some(proof) = embedded_proof {
                self.timeless
                    .verify(name, proof, now)
                    .map_err(|err| registry_err(name, &err))?;
            }
            let profile = self
                .timeless
                .verify(name, &cached, now)
                .map_err(|err| registry_err(name, &err))?;
            return ChatProfile::extract(&profile).map_err(|err| registry_err(name, &err));
        }

        // Case 3: first sight of this name; ask the registry.
        let (_, reply) =
            self.registry.lookup(name).map_err(|err| registry_err(name, &err))?;
        let profile = self
            .fresh
            .verify(name, &reply, now)
            .map_err(|err| registry_err(name, &err))?;
        let chat = ChatProfile::extract(&profile).map_err(|err| registry_err(name, &err))?;
        self.cache(name, &reply);
        Ok(chat)
    }
}
