//! The plaintext message record and local conversation metadata.

use murmur_registry::LookupReply;
use serde::{Deserialize, Serialize};

use crate::{ProtocolError, Result};

/// The record peers exchange inside envelopes.
///
/// The sender's name travels here, inside the ciphertext, never in the
/// envelope framing: a mailbox server or passive observer cannot bucket
/// envelopes by sender, and recipients authenticate the claimed name via
/// the embedded registry proof (or their own lookup) before trusting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message body bytes.
    pub contents: Vec<u8>,
    /// Conversation subject.
    pub subject: String,
    /// All participant names, including the sender.
    pub participants: Vec<String>,
    /// Sender-stamped time, Unix nanoseconds. Receivers treat this as a
    /// claim, not a fact.
    pub date: i64,
    /// The sender's registered name.
    pub sender: String,
    /// Registry reply proving the sender's name -> profile binding, so the
    /// recipient can authenticate without a live registry round-trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_proof: Option<LookupReply>,
}

impl Message {
    /// CBOR-encode the record.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(out)
    }

    /// Decode a CBOR-encoded record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Metadata file describing a conversation directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    /// All participant names, including the local user.
    pub participants: Vec<String>,
    /// Conversation subject.
    pub subject: String,
}

impl ConversationMetadata {
    /// CBOR-encode the record.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(out)
    }

    /// Decode a CBOR-encoded record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}
