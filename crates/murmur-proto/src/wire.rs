//! Client <-> server command records.
//!
//! The wire shape is a single request record with one optional field per
//! verb and a single response record with optional fields per reply kind.
//! At the server boundary the request record is converted into the tagged
//! [`Command`] enum so the command loop dispatches by exhaustive match; a
//! record populating zero or several verbs is malformed.
//!
//! # Security
//!
//! The response record discriminates failures no further than
//! [`Status::ParseError`]. Whatever went wrong server-side, remote callers
//! learn one bit.

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, Result, Uid};

/// Outcome of a server operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// The operation succeeded.
    #[default]
    Ok,
    /// The operation failed; no further detail is disclosed.
    ParseError,
}

/// Envelope deposit payload: the target mailbox plus the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverEnvelope {
    /// Mailbox to deposit into.
    pub user: Uid,
    /// Envelope bytes, already padded and sealed.
    pub envelope: Vec<u8>,
}

/// The single client request record. Exactly one verb field is populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCommand {
    /// Create the caller's mailbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_account: Option<bool>,
    /// Deposit an envelope into some mailbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver_envelope: Option<DeliverEnvelope>,
    /// List stored envelope hashes for the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_messages: Option<bool>,
    /// Fetch one stored envelope by hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_envelope: Option<[u8; 32]>,
    /// Delete stored envelopes by hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_messages: Option<Vec<[u8; 32]>>,
    /// Upload signed prekeys to the caller's pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_signed_keys: Option<Vec<Vec<u8>>>,
    /// Take one signed prekey from the named user's pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_signed_key: Option<Uid>,
    /// Count the caller's remaining prekeys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_num_keys: Option<bool>,
    /// Toggle push delivery of incoming envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_envelopes: Option<bool>,
}

impl ClientCommand {
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

/// A request record decoded to exactly one verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the caller's mailbox.
    CreateAccount,
    /// Deposit an envelope into `user`'s mailbox.
    DeliverEnvelope(DeliverEnvelope),
    /// List the caller's stored envelope hashes.
    ListMessages,
    /// Fetch one stored envelope by hash.
    DownloadEnvelope([u8; 32]),
    /// Delete stored envelopes by hash.
    DeleteMessages(Vec<[u8; 32]>),
    /// Upload signed prekeys to the caller's pool.
    UploadSignedKeys(Vec<Vec<u8>>),
    /// Take one signed prekey from `user`'s pool.
    GetSignedKey(Uid),
    /// Count the caller's remaining prekeys.
    GetNumKeys,
    /// Toggle push delivery.
    ReceiveEnvelopes(bool),
}

impl TryFrom<ClientCommand> for Command {
    type Error = ProtocolError;

    fn try_from(record: ClientCommand) -> Result<Self> {
        let mut verbs: Vec<Command> = Vec::with_capacity(1);

        if record.create_account == Some(true) {
            verbs.push(Command::CreateAccount);
        }
        if let Some(deliver) = record.deliver_envelope {
            verbs.push(Command::DeliverEnvelope(deliver));
        }
        if record.list_messages == Some(true) {
            verbs.push(Command::ListMessages);
        }
        if let Some(hash) = record.download_envelope {
            verbs.push(Command::DownloadEnvelope(hash));
        }
        if let Some(hashes) = record.delete_messages {
            verbs.push(Command::DeleteMessages(hashes));
        }
        if let Some(keys) = record.upload_signed_keys {
            verbs.push(Command::UploadSignedKeys(keys));
        }
        if let Some(user) = record.get_signed_key {
            verbs.push(Command::GetSignedKey(user));
        }
        if record.get_num_keys == Some(true) {
            verbs.push(Command::GetNumKeys);
        }
        if let Some(enable) = record.receive_envelopes {
            verbs.push(Command::ReceiveEnvelopes(enable));
        }

        if verbs.len() == 1 {
            // Just verified there is exactly one element.
            Ok(verbs.remove(0))
        } else {
            Err(ProtocolError::AmbiguousCommand(verbs.len()))
        }
    }
}

/// The single server response record.
///
/// A reply to a command sets `push: false`; an unsolicited envelope
/// notification sets `push: true` with only `envelope` populated, which is
/// how the client's reader demultiplexes the two streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerReply {
    /// Outcome of the command (always `Ok` for pushes).
    pub status: Status,
    /// True when this frame is an unsolicited envelope notification.
    #[serde(default)]
    pub push: bool,
    /// Envelope hashes, for `ListMessages`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_list: Option<Vec<[u8; 32]>>,
    /// Envelope bytes, for `DownloadEnvelope` and pushes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<Vec<u8>>,
    /// One signed prekey, for `GetSignedKey`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_key: Option<Vec<u8>>,
    /// Pool size, for `GetNumKeys`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_keys: Option<i64>,
}

impl ServerReply {
    /// A bare success reply.
    pub fn ok() -> Self {
        Self { status: Status::Ok, ..Self::default() }
    }

    /// The undiscriminated failure reply.
    pub fn parse_error() -> Self {
        Self { status: Status::ParseError, ..Self::default() }
    }

    /// An unsolicited envelope notification.
    pub fn pushed(envelope: Vec<u8>) -> Self {
        Self { status: Status::Ok, push: true, envelope: Some(envelope), ..Self::default() }
    }

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_verb_decodes() {
        let record = ClientCommand { get_num_keys: Some(true), ..ClientCommand::default() };
        assert_eq!(Command::try_from(record).unwrap(), Command::GetNumKeys);
    }

    #[test]
    fn empty_record_rejected() {
        let err = Command::try_from(ClientCommand::default()).unwrap_err();
        assert!(matches!(err, ProtocolError::AmbiguousCommand(0)));
    }

    #[test]
    fn false_flag_is_not_a_verb() {
        let record = ClientCommand { create_account: Some(false), ..ClientCommand::default() };
        assert!(matches!(
            Command::try_from(record),
            Err(ProtocolError::AmbiguousCommand(0))
        ));
    }

    #[test]
    fn two_verbs_rejected() {
        let record = ClientCommand {
            create_account: Some(true),
            get_num_keys: Some(true),
            ..ClientCommand::default()
        };
        assert!(matches!(
            Command::try_from(record),
            Err(ProtocolError::AmbiguousCommand(2))
        ));
    }

    #[test]
    fn receive_envelopes_false_is_a_verb() {
        let record =
            ClientCommand { receive_envelopes: Some(false), ..ClientCommand::default() };
        assert_eq!(Command::try_from(record).unwrap(), Command::ReceiveEnvelopes(false));
    }

    #[test]
    fn command_record_round_trip() {
        let record = ClientCommand {
            deliver_envelope: Some(DeliverEnvelope { user: [7; 32], envelope: vec![1, 2, 3] }),
            ..ClientCommand::default()
        };
        let decoded = ClientCommand::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn reply_round_trip() {
        let reply = ServerReply {
            message_list: Some(vec![[1; 32], [2; 32]]),
            num_keys: Some(42),
            ..ServerReply::ok()
        };
        let decoded = ServerReply::from_bytes(&reply.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, reply);
        assert!(!decoded.push);
    }

    #[test]
    fn push_reply_is_marked() {
        let reply = ServerReply::pushed(vec![9; 16]);
        let decoded = ServerReply::from_bytes(&reply.to_bytes().unwrap()).unwrap();
        assert!(decoded.push);
        assert_eq!(decoded.envelope.as_deref(), Some(&[9; 16][..]));
    }
}
