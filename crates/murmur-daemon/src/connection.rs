//! Connections to mailbox servers.
//!
//! One [`ServerConnection`] wraps a framed transport channel. A reader
//! task demultiplexes inbound frames: replies answer commands in order and
//! go to the caller; frames marked as pushes carry unsolicited envelopes
//! and surface on a separate channel the engine selects over.
//!
//! The same type serves both roles: the authenticated connection to our
//! home server, and anonymous connections to foreign servers for prekey
//! fetch and envelope deposit.

use murmur_proto::{
    ClientCommand, DeliverEnvelope, SERVER_FRAME_SIZE, ServerReply, Status, Uid, pad, unpad,
};
use murmur_registry::ChatProfile;
use murmur_transport::{FrameReader, FrameWriter, client_handshake};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};

use crate::{AccountConfig, DaemonError};

/// A command/reply channel to one mailbox server.
pub struct ServerConnection {
    writer: FrameWriter,
    replies: mpsc::Receiver<ServerReply>,
    reader_task: JoinHandle<()>,
}

impl ServerConnection {
    /// Connect to our home server, authenticated with the account's
    /// transport key. Also returns the push-envelope stream.
    pub async fn connect_home(
        config: &AccountConfig,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>), DaemonError> {
        let stream = TcpStream::connect(&config.server_addr).await?;
        let (reader, writer) = client_handshake(
            stream,
            &config.server_transport_pub,
            Some(&config.transport_secret),
            SERVER_FRAME_SIZE,
        )
        .await?;
        Ok(Self::establish(reader, writer))
    }

    /// Connect to a peer's home server under a fresh anonymous identity.
    pub async fn connect_foreign(profile: &ChatProfile) -> Result<Self, DaemonError> {
        let stream = TcpStream::connect(&profile.server_addr).await?;
        let (reader, writer) = client_handshake(
            stream,
            &profile.server_transport_pub,
            None,
            SERVER_FRAME_SIZE,
        )
        .await?;
        let (conn, _pushes) = Self::establish(reader, writer);
        Ok(conn)
    }

    fn establish(
        reader: FrameReader,
        writer: FrameWriter,
    ) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (reply_tx, reply_rx) = mpsc::channel(1);
        let (push_tx, push_rx) = mpsc::channel(32);
        let reader_task = tokio::spawn(demux_frames(reader, reply_tx, push_tx));
        (Self { writer, replies: reply_rx, reader_task }, push_rx)
    }

    /// Stop the reader task and drop the connection.
    pub fn close(self) {
        self.reader_task.abort();
    }

    /// Send one command and wait for its reply, whatever its status.
    async fn call_raw(&mut self, command: &ClientCommand) -> Result<ServerReply, DaemonError> {
        let padded = pad(&command.to_bytes()?, SERVER_FRAME_SIZE)?;
        self.writer.write_frame(&padded).await?;
        self.replies.recv().await.ok_or(DaemonError::Disconnected)
    }

    /// Send one command; any non-OK status is an error named `op`.
    async fn call(
        &mut self,
        op: &'static str,
        command: &ClientCommand,
    ) -> Result<ServerReply, DaemonError> {
        let reply = self.call_raw(command).await?;
        if reply.status == Status::Ok {
            Ok(reply)
        } else {
            Err(DaemonError::ServerRejected(op))
        }
    }

    /// Ensure our mailbox exists. Idempotent.
    pub async fn create_account(&mut self) -> Result<(), DaemonError> {
        self.call(
            "create account",
            &ClientCommand { create_account: Some(true), ..ClientCommand::default() },
        )
        .await
        .map(|_| ())
    }

    /// Upload a batch of signed prekeys to our pool.
    pub async fn upload_signed_prekeys(
        &mut self,
        keys: Vec<Vec<u8>>,
    ) -> Result<(), DaemonError> {
        self.call(
            "upload prekeys",
            &ClientCommand { upload_signed_keys: Some(keys), ..ClientCommand::default() },
        )
        .await
        .map(|_| ())
    }

    /// How many prekeys the server still holds for us.
    pub async fn prekey_count(&mut self) -> Result<i64, DaemonError> {
        let reply = self
            .call(
                "count prekeys",
                &ClientCommand { get_num_keys: Some(true), ..ClientCommand::default() },
            )
            .await?;
        reply.num_keys.ok_or(DaemonError::ServerRejected("count prekeys"))
    }

    /// Take one signed prekey from `target`'s pool. `None` when empty.
    pub async fn take_signed_prekey(
        &mut self,
        target: &Uid,
    ) -> Result<Option<Vec<u8>>, DaemonError> {
        let reply = self
            .call_raw(&ClientCommand {
                get_signed_key: Some(*target),
                ..ClientCommand::default()
            })
            .await?;
        // An exhausted pool is the server's one indistinct failure.
        if reply.status == Status::Ok { Ok(reply.signed_key) } else { Ok(None) }
    }

    /// Hashes of every envelope in our mailbox.
    pub async fn list_envelopes(&mut self) -> Result<Vec<[u8; 32]>, DaemonError> {
        let reply = self
            .call(
                "list envelopes",
                &ClientCommand { list_messages: Some(true), ..ClientCommand::default() },
            )
            .await?;
        Ok(reply.message_list.unwrap_or_default())
    }

    /// Fetch one envelope by hash.
    pub async fn download_envelope(
        &mut self,
        hash: &[u8; 32],
    ) -> Result<Vec<u8>, DaemonError> {
        let reply = self
            .call(
                "download envelope",
                &ClientCommand { download_envelope: Some(*hash), ..ClientCommand::default() },
            )
            .await?;
        reply.envelope.ok_or(DaemonError::ServerRejected("download envelope"))
    }

    /// Delete envelopes from our mailbox.
    pub async fn delete_envelopes(
        &mut self,
        hashes: &[[u8; 32]],
    ) -> Result<(), DaemonError> {
        self.call(
            "delete envelopes",
            &ClientCommand {
                delete_messages: Some(hashes.to_vec()),
                ..ClientCommand::default()
            },
        )
        .await
        .map(|_| ())
    }

    /// Deposit an envelope into `target`'s mailbox.
    pub async fn deliver_envelope(
        &mut self,
        target: &Uid,
        envelope: Vec<u8>,
    ) -> Result<(), DaemonError> {
        self.call(
            "deliver envelope",
            &ClientCommand {
                deliver_envelope: Some(DeliverEnvelope { user: *target, envelope }),
                ..ClientCommand::default()
            },
        )
        .await
        .map(|_| ())
    }

    /// Subscribe to push delivery on this connection.
    pub async fn enable_push(&mut self) -> Result<(), DaemonError> {
        self.call(
            "enable push",
            &ClientCommand { receive_envelopes: Some(true), ..ClientCommand::default() },
        )
        .await
        .map(|_| ())
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Route inbound frames: pushes to the push channel, everything else to
/// the reply channel. Ends silently when the connection or the engine
/// goes away.
async fn demux_frames(
    mut reader: FrameReader,
    replies: mpsc::Sender<ServerReply>,
    pushes: mpsc::Sender<Vec<u8>>,
) {
    let mut buf = vec![0u8; SERVER_FRAME_SIZE];
    loop {
        if let Err(err) = reader.read_frame(&mut buf).await {
            tracing::debug!(%err, "server connection read ended");
            return;
        }
        let reply = match unpad(&buf).and_then(ServerReply::from_bytes) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(%err, "malformed frame from server");
                return;
            }
        };
        if reply.push {
            let Some(envelope) = reply.envelope else {
                tracing::warn!("push frame without envelope");
                continue;
            };
            if pushes.send(envelope).await.is_err() {
                return;
            }
        } else if replies.send(reply).await.is_err() {
            return;
        }
    }
}
