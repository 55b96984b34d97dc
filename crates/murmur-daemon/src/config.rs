//! Local account configuration.

use std::path::Path;

use ed25519_dalek::SigningKey;
use murmur_registry::{ChatProfile, Profile};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{DaemonError, paths::Layout, store};

/// Refill the prekey pool whenever the server holds fewer than this.
pub const MIN_PREKEYS: i64 = 50;

/// Pool size the refill tops up to.
pub const MAX_PREKEYS: i64 = 100;

/// Everything a daemon needs to act as one account: the registered name,
/// the home server, and the three long-term secrets (transport, message
/// auth, prekey signing). Stored as CBOR at `<root>/config`; secrets live
/// only in this file, so the root directory is the account.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Our registered name.
    pub name: String,
    /// Home server address, `host:port`.
    pub server_addr: String,
    /// Home server transport public key.
    pub server_transport_pub: [u8; 32],
    /// X25519 secret identifying us to our home server (its public half is
    /// our mailbox UID).
    pub transport_secret: [u8; 32],
    /// X25519 secret for envelope auth tags.
    pub message_auth_secret: [u8; 32],
    /// Ed25519 seed for signing prekeys.
    pub key_signing_secret: [u8; 32],
    /// The registry's verifying key.
    pub registry_pub: [u8; 32],
    /// Freshness window (seconds) for live registry evidence.
    pub registry_freshness_secs: u64,
}

impl AccountConfig {
    /// Generate a new account with fresh long-term keys.
    pub fn generate(
        name: &str,
        server_addr: &str,
        server_transport_pub: [u8; 32],
        registry_pub: [u8; 32],
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Self {
        let transport = StaticSecret::random_from_rng(&mut *rng);
        let auth = StaticSecret::random_from_rng(&mut *rng);
        let mut signing_seed = [0u8; 32];
        rng.fill_bytes(&mut signing_seed);

        Self {
            name: name.to_string(),
            server_addr: server_addr.to_string(),
            server_transport_pub,
            transport_secret: transport.to_bytes(),
            message_auth_secret: auth.to_bytes(),
            key_signing_secret: signing_seed,
            registry_pub,
            registry_freshness_secs: 60 * 60 * 24,
        }
    }

    /// Our mailbox UID at the home server.
    pub fn uid(&self) -> [u8; 32] {
        PublicKey::from(&StaticSecret::from(self.transport_secret)).to_bytes()
    }

    /// The prekey signing key.
    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.key_signing_secret)
    }

    /// The public chat record peers find in the registry.
    pub fn chat_profile(&self) -> ChatProfile {
        ChatProfile {
            server_addr: self.server_addr.clone(),
            server_transport_pub: self.server_transport_pub,
            user_id_at_server: self.uid(),
            key_signing_pub: self.signing_key().verifying_key().to_bytes(),
            message_auth_pub: PublicKey::from(&StaticSecret::from(self.message_auth_secret))
                .to_bytes(),
        }
    }

    /// A registry profile carrying our chat record, ready to register.
    pub fn build_profile(&self) -> Result<Profile, DaemonError> {
        let mut profile = Profile::default();
        self.chat_profile().embed(&mut profile)?;
        Ok(profile)
    }

    /// Load the account from `<root>/config`.
    pub fn load(root: &Path) -> Result<Self, DaemonError> {
        let path = root.join("config");
        let bytes = std::fs::read(&path).map_err(|err| {
            DaemonError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        ciborium::from_reader(bytes.as_slice())
            .map_err(|err| DaemonError::Config(format!("cannot parse config: {err}")))
    }

    /// Persist the account to `<root>/config`.
    pub fn save(&self, layout: &Layout) -> Result<(), DaemonError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|err| DaemonError::Config(format!("cannot encode config: {err}")))?;
        store::atomic_write(layout, &layout.root().join("config"), &bytes)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn generated_account_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path().to_path_buf());
        layout.init_fs().unwrap();

        let config =
            AccountConfig::generate("alice", "127.0.0.1:1", [1; 32], [2; 32], &mut OsRng);
        config.save(&layout).unwrap();

        let loaded = AccountConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.name, "alice");
        assert_eq!(loaded.uid(), config.uid());
        assert_eq!(loaded.chat_profile(), config.chat_profile());
    }

    #[test]
    fn chat_profile_carries_derived_publics() {
        let config =
            AccountConfig::generate("bob", "h:1", [0; 32], [0; 32], &mut OsRng);
        let profile = config.chat_profile();
        assert_eq!(profile.user_id_at_server, config.uid());
        assert_ne!(profile.message_auth_pub, [0; 32]);
        assert_ne!(profile.key_signing_pub, [0; 32]);
    }

    #[test]
    fn missing_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AccountConfig::load(dir.path()),
            Err(DaemonError::Config(_))
        ));
    }
}
