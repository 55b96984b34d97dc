//! Profile records and the chat sub-record.
//!
//! A registry [`Profile`] is a bag of numbered fields; applications claim a
//! field id and store their own record under it. Murmur's chat sub-record
//! lives at field [`CHAT_PROFILE_FIELD`] and carries everything a stranger
//! needs to contact the owner: the home server, the transport identity at
//! that server, and the owner's long-term signing and auth keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::RegistryError;

/// Field id under which the chat sub-record is stored.
pub const CHAT_PROFILE_FIELD: u32 = 1984;

/// A registry profile: a versioned map of numbered fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Monotonic version, bumped by the registry on every update.
    pub version: u64,
    /// Application fields, keyed by field id.
    pub fields: BTreeMap<u32, Vec<u8>>,
}

impl Profile {
    /// Raw bytes of a field, if present.
    pub fn field(&self, id: u32) -> Result<&[u8], RegistryError> {
        self.fields.get(&id).map(Vec::as_slice).ok_or(RegistryError::MissingField(id))
    }

    /// CBOR-encode the profile.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RegistryError> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| RegistryError::Encoding(e.to_string()))?;
        Ok(out)
    }

    /// Decode a CBOR-encoded profile.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RegistryError> {
        ciborium::from_reader(bytes).map_err(|e| RegistryError::Encoding(e.to_string()))
    }
}

/// The chat sub-record embedded in a profile at [`CHAT_PROFILE_FIELD`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatProfile {
    /// Home server address, `host:port`.
    pub server_addr: String,
    /// The home server's transport public key (X25519).
    pub server_transport_pub: [u8; 32],
    /// The owner's transport identity at that server; this is the mailbox
    /// UID peers deposit envelopes into.
    pub user_id_at_server: [u8; 32],
    /// Ed25519 key the owner signs prekeys with.
    pub key_signing_pub: [u8; 32],
    /// X25519 key envelope auth tags are bound to.
    pub message_auth_pub: [u8; 32],
}

impl ChatProfile {
    /// CBOR-encode the sub-record.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RegistryError> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| RegistryError::Encoding(e.to_string()))?;
        Ok(out)
    }

    /// Decode a CBOR-encoded sub-record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RegistryError> {
        ciborium::from_reader(bytes).map_err(|e| RegistryError::Encoding(e.to_string()))
    }

    /// Store this sub-record into `profile` under [`CHAT_PROFILE_FIELD`].
    pub fn embed(&self, profile: &mut Profile) -> Result<(), RegistryError> {
        profile.fields.insert(CHAT_PROFILE_FIELD, self.to_bytes()?);
        Ok(())
    }

    /// Extract the sub-record from a profile.
    pub fn extract(profile: &Profile) -> Result<Self, RegistryError> {
        Self::from_bytes(profile.field(CHAT_PROFILE_FIELD)?)
    }
}
