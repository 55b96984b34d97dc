//! Murmur mailbox server.
//!
//! A buffered ciphertext relay. Clients authenticate by transport key
//! alone: the UID established at handshake names the mailbox, and that is
//! the server's entire notion of identity. Any client may deposit
//! envelopes into any mailbox; only the owner can read, list, delete, or
//! upload prekeys to its own.
//!
//! # Architecture
//!
//! One task per accepted connection runs the command loop; a reader
//! sub-task decodes frames into commands so the loop can select over
//! commands, push notifications, and shutdown. Storage is [`MailboxStore`]
//! (redb, durable commits); push delivery is [`Notifier`], whose
//! overflow-and-close policy keeps slow consumers from ever back-pressuring
//! the storage path.
//!
//! Failures follow one rule outward: whatever a command did wrong, the
//! client sees `ParseError` and nothing more.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod notifier;
mod store;

use std::{net::SocketAddr, sync::Arc};

pub use error::{ServerError, StoreError};
use murmur_proto::{
    ClientCommand, Command, SERVER_FRAME_SIZE, ServerReply, Uid, pad, unpad,
};
use murmur_transport::{FrameReader, FrameWriter, server_handshake};
pub use notifier::{Notifier, SUBSCRIBER_QUEUE_DEPTH};
pub use store::MailboxStore;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{Mutex, mpsc, watch},
    task::{JoinHandle, JoinSet},
};

/// What a command asked to happen to this connection's push subscription.
enum SubAction {
    Keep,
    Enable,
    Disable,
}

/// State shared by every connection task.
struct Shared {
    store: MailboxStore,
    notifier: Notifier,
    /// Serializes prekey dispensing end to end. Redb already serializes
    /// the write transactions; this keeps the giveaway path explicit and
    /// independent of storage internals.
    key_mutex: Mutex<()>,
    transport_secret: [u8; 32],
}

/// A running mailbox server.
pub struct Server {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl Server {
    /// Bind and start serving.
    pub async fn start(
        store: MailboxStore,
        transport_secret: [u8; 32],
        bind_addr: &str,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            store,
            notifier: Notifier::new(),
            key_mutex: Mutex::new(()),
            transport_secret,
        });
        let accept_task = tokio::spawn(accept_loop(listener, shared, shutdown_rx));
        tracing::info!(%local_addr, "mailbox server listening");
        Ok(Self { local_addr, shutdown: shutdown_tx, accept_task })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Broadcast shutdown and wait for every connection task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.accept_task.await;
        tracing::info!("mailbox server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "connection accepted");
                    let shared = Arc::clone(&shared);
                    let shutdown_rx = shutdown_rx.clone();
                    connections.spawn(async move {
                        if let Err(err) = run_connection(shared, stream, shutdown_rx).await {
                            tracing::debug!(%err, "connection ended with error");
                        }
                    });
                }
                Err(err) => {
                    tracing::error!(%err, "accept failed");
                    break;
                }
            }
        }
    }
    drop(listener);
    while connections.join_next().await.is_some() {}
}

/// One client connection: handshake, then the command loop.
async fn run_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let (reader, mut writer, uid) = tokio::select! {
        _ = shutdown_rx.changed() => return Ok(()),
        handshake = server_handshake(stream, &shared.transport_secret, SERVER_FRAME_SIZE) => {
            handshake?
        }
    };

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ClientCommand>(1);
    let reader_task = tokio::spawn(read_records(reader, cmd_tx));

    let mut sub_id: Option<u64> = None;
    let mut sub_rx: Option<mpsc::Receiver<Vec<u8>>> = None;

    let result = loop {
        let push = async {
            match sub_rx.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown_rx.changed() => break Ok(()),

            record = cmd_rx.recv() => {
                let Some(record) = record else {
                    // Reader ended: disconnect or malformed frame.
                    break Ok(());
                };
                let (reply, action) = match Command::try_from(record) {
                    Ok(command) => shared.execute(&uid, command).await,
                    Err(err) => {
                        tracing::debug!(%err, "unusable command record");
                        (ServerReply::parse_error(), SubAction::Keep)
                    }
                };
                if let Err(err) = write_reply(&mut writer, &reply).await {
                    break Err(err);
                }
                match action {
                    SubAction::Keep => {}
                    SubAction::Enable => {
                        // Re-enabling while already on is a no-op.
                        if sub_id.is_none() {
                            let (id, rx) = shared.notifier.subscribe(uid);
                            sub_id = Some(id);
                            sub_rx = Some(rx);
                        }
                    }
                    SubAction::Disable => {
                        if let Some(id) = sub_id.take() {
                            shared.notifier.unsubscribe(&uid, id);
                            sub_rx = None;
                        }
                    }
                }
            }

            pushed = push => {
                match pushed {
                    Some(envelope) => {
                        if let Err(err) =
                            write_reply(&mut writer, &ServerReply::pushed(envelope)).await
                        {
                            break Err(err);
                        }
                    }
                    None => {
                        // Overflowed: the notifier already dropped us. The
                        // client falls back to listing its mailbox.
                        sub_id = None;
                        sub_rx = None;
                    }
                }
            }
        }
    };

    reader_task.abort();
    if let Some(id) = sub_id {
        shared.notifier.unsubscribe(&uid, id);
    }
    result
}

/// Decode inbound frames into command records. Any read or decode failure
/// ends the connection (the channel close is the signal).
async fn read_records(mut reader: FrameReader, tx: mpsc::Sender<ClientCommand>) {
    let mut buf = vec![0u8; SERVER_FRAME_SIZE];
    loop {
        if let Err(err) = reader.read_frame(&mut buf).await {
            tracing::debug!(%err, "connection read ended");
            return;
        }
        let record = match unpad(&buf).and_then(ClientCommand::from_bytes) {
            Ok(record) => record,
            Err(err) => {
                tracing::debug!(%err, "malformed command frame");
                return;
            }
        };
        if tx.send(record).await.is_err() {
            return;
        }
    }
}

async fn write_reply(writer: &mut FrameWriter, reply: &ServerReply) -> Result<(), ServerError> {
    let padded = pad(&reply.to_bytes()?, SERVER_FRAME_SIZE)?;
    writer.write_frame(&padded).await?;
    Ok(())
}

impl Shared {
    /// Run one command against storage. Every failure collapses to
    /// `ParseError` on the wire.
    async fn execute(&self, uid: &Uid, command: Command) -> (ServerReply, SubAction) {
        let outcome: Result<(ServerReply, SubAction), StoreError> = match command {
            Command::CreateAccount => {
                self.store.create_user(uid).map(|()| (ServerReply::ok(), SubAction::Keep))
            }
            Command::DeliverEnvelope(deliver) => {
                match self.store.put_envelope(&deliver.user, &deliver.envelope) {
                    Ok(hash) => {
                        tracing::debug!(hash = ?&hash[..4], "envelope stored");
                        self.notifier.notify(&deliver.user, &deliver.envelope);
                        Ok((ServerReply::ok(), SubAction::Keep))
                    }
                    Err(err) => Err(err),
                }
            }
            Command::ListMessages => self.store.list_envelopes(uid).map(|hashes| {
                let reply =
                    ServerReply { message_list: Some(hashes), ..ServerReply::ok() };
                (reply, SubAction::Keep)
            }),
            Command::DownloadEnvelope(hash) => {
                match self.store.get_envelope(uid, &hash) {
                    Ok(Some(envelope)) => {
                        let reply =
                            ServerReply { envelope: Some(envelope), ..ServerReply::ok() };
                        Ok((reply, SubAction::Keep))
                    }
                    Ok(None) => Ok((ServerReply::parse_error(), SubAction::Keep)),
                    Err(err) => Err(err),
                }
            }
            Command::DeleteMessages(hashes) => self
                .store
                .delete_envelopes(uid, &hashes)
                .map(|()| (ServerReply::ok(), SubAction::Keep)),
            Command::UploadSignedKeys(keys) => self
                .store
                .add_prekeys(uid, &keys)
                .map(|()| (ServerReply::ok(), SubAction::Keep)),
            Command::GetSignedKey(target) => {
                // Exactly-once dispensing: scan-and-remove under the lock.
                let _guard = self.key_mutex.lock().await;
                match self.store.take_prekey(&target) {
                    Ok(Some(key)) => {
                        let reply =
                            ServerReply { signed_key: Some(key), ..ServerReply::ok() };
                        Ok((reply, SubAction::Keep))
                    }
                    Ok(None) => Ok((ServerReply::parse_error(), SubAction::Keep)),
                    Err(err) => Err(err),
                }
            }
            Command::GetNumKeys => self.store.count_prekeys(uid).map(|count| {
                let reply = ServerReply { num_keys: Some(count), ..ServerReply::ok() };
                (reply, SubAction::Keep)
            }),
            Command::ReceiveEnvelopes(enable) => {
                let action = if enable { SubAction::Enable } else { SubAction::Disable };
                Ok((ServerReply::ok(), action))
            }
        };

        match outcome {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(%err, "command failed");
                (ServerReply::parse_error(), SubAction::Keep)
            }
        }
    }
}
