//! The daemon session engine.
//!
//! One cooperative task owns all mutable state: the prekey pool, every
//! ratchet, and the home-server connection. The main loop selects over
//! outbox filesystem events, pushed envelopes, a polling fallback tick,
//! and shutdown; crypto, filesystem, and network work all execute inline,
//! which serializes per-peer state transitions by construction.
//!
//! Errors touching local state or the home connection are fatal: the
//! daemon stops rather than run with possibly divergent state. An inbound
//! envelope nothing can open is the one tolerated failure; it is logged
//! and skipped.

use std::path::{Path, PathBuf};

use chrono::Utc;
use murmur_crypto::{ProfileResolver, Ratchet, RatchetError};
use murmur_proto::{
    ConversationMetadata, EnvelopeHead, Message, envelope_id, sign_prekeys,
    verify_signed_prekey,
};
use murmur_registry::Registry;
use notify::{RecursiveMode, Watcher};
use rand::rngs::OsRng;
use tokio::sync::{mpsc, watch};

use crate::{
    AccountConfig, DaemonError, MAX_PREKEYS, MIN_PREKEYS,
    connection::ServerConnection,
    paths::{
        Layout, METADATA_FILE, conversation_dir_name, conversation_stamp,
        message_file_name, participant_suffix,
    },
    prekeys::PrekeyPool,
    resolver::CachedResolver,
    store,
};

/// Receive-side clamp window for sender-stamped dates: seven days.
const DATE_CLAMP_WINDOW_NANOS: i64 = 7 * 24 * 60 * 60 * 1_000_000_000;

/// Polling fallback period. Push delivery is the fast path; the poll
/// catches envelopes that arrived while our push subscription had
/// overflowed or was down.
const POLL_PERIOD: std::time::Duration = std::time::Duration::from_secs(300);

/// The per-account engine: owns the session state and the home connection.
pub struct Engine<R: Registry> {
    config: AccountConfig,
    layout: Layout,
    home: ServerConnection,
    resolver: CachedResolver<R>,
    pool: PrekeyPool,
}

impl<R: Registry> Engine<R> {
    /// Bring an account online: connect home, ensure the mailbox exists,
    /// top up prekeys, subscribe to push. Returns the engine and the
    /// pushed-envelope stream.
    pub async fn start(
        root: PathBuf,
        registry: R,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>), DaemonError> {
        let config = AccountConfig::load(&root)?;
        let layout = Layout::new(root);
        layout.init_fs()?;

        let (mut home, pushes) = ServerConnection::connect_home(&config).await?;
        home.create_account().await?;

        let resolver = CachedResolver::new(registry, &config, layout.clone());
        let pool = store::load_prekey_pool(&layout)?;

        let mut engine = Self { config, layout, home, resolver, pool };
        engine.top_up_prekeys().await?;
        engine.home.enable_push().await?;
        tracing::info!(name = %engine.config.name, "engine online");
        Ok((engine, pushes))
    }

    /// The account configuration.
    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    /// The on-disk layout.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Unconsumed prekeys held locally.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Prekeys the server still holds for us.
    pub async fn server_prekey_count(&mut self) -> Result<i64, DaemonError> {
        self.home.prekey_count().await
    }

    /// Refill the server-side pool when it has dipped below the minimum.
    ///
    /// Secrets are persisted before the signed publics are uploaded; a
    /// crash in between costs one batch of never-used prekeys, never a
    /// served prekey whose secret is missing.
    pub async fn top_up_prekeys(&mut self) -> Result<(), DaemonError> {
        let count = self.home.prekey_count().await?;
        if count >= MIN_PREKEYS {
            return Ok(());
        }
        let need = (MAX_PREKEYS - count).max(0) as usize;
        let publics = self.pool.generate_into(need, &mut OsRng);
        store::store_prekey_pool(&self.layout, &self.pool)?;
        let signed = sign_prekeys(&publics, &self.config.signing_key());
        self.home.upload_signed_prekeys(signed).await?;
        tracing::info!(had = count, added = need, "prekey pool topped up");
        Ok(())
    }

    /// List, download, and handle everything currently in the mailbox.
    pub async fn drain_mailbox(&mut self) -> Result<(), DaemonError> {
        let hashes = self.home.list_envelopes().await?;
        if !hashes.is_empty() {
            tracing::debug!(count = hashes.len(), "draining mailbox");
        }
        for hash in hashes {
            let envelope = self.home.download_envelope(&hash).await?;
            self.handle_envelope(&envelope).await?;
        }
        Ok(())
    }

    /// Classify, decrypt, file, and acknowledge one inbound envelope.
    pub async fn handle_envelope(&mut self, envelope: &[u8]) -> Result<(), DaemonError> {
        match self.decrypt_envelope(envelope) {
            Ok((message, consumed_prekey)) => {
                self.file_incoming(&message)?;
                self.home.delete_envelopes(&[envelope_id(envelope)]).await?;
                if consumed_prekey {
                    self.top_up_prekeys().await?;
                }
                Ok(())
            }
            Err(DaemonError::Undecryptable) => {
                // A stranger can always deposit garbage; skipping it is the
                // only option that doesn't hand them a kill switch.
                tracing::warn!("envelope matched no prekey and no session, skipping");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// First-contact attempt against the prekey pool, then steady-state
    /// attempts across every known session. Returns the message and
    /// whether a prekey was consumed.
    fn decrypt_envelope(
        &mut self,
        envelope: &[u8],
    ) -> Result<(Message, bool), DaemonError> {
        if let Ok(head) = EnvelopeHead::parse(envelope) {
            if let Some(pair) = self.pool.find(&head.prekey_pub).cloned() {
                match Ratchet::decrypt_first(
                    envelope,
                    &pair.secret,
                    &self.config.message_auth_secret,
                    &mut self.resolver,
                ) {
                    Ok((ratchet, message)) => {
                        self.pool.remove(&pair.public);
                        store::store_prekey_pool(&self.layout, &self.pool)?;
                        store::store_ratchet(&self.layout, &message.sender, &ratchet)?;
                        tracing::info!(sender = %message.sender, "session established");
                        return Ok((message, true));
                    }
                    Err(err) => {
                        tracing::debug!(%err, "first-contact attempt failed");
                    }
                }
            }
        }

        for (peer, mut ratchet) in store::all_ratchets(&self.layout)? {
            match ratchet.decrypt(envelope) {
                Ok(message) => {
                    store::store_ratchet(&self.layout, &peer, &ratchet)?;
                    return Ok((message, false));
                }
                Err(
                    RatchetError::MacMismatch
                    | RatchetError::AeadFailure
                    | RatchetError::ShortInput { .. }
                    | RatchetError::OutOfOrder { .. },
                ) => {
                    // Expected during classification: not this session.
                }
                Err(err) => {
                    tracing::debug!(%peer, %err, "session attempt failed");
                }
            }
        }
        Err(DaemonError::Undecryptable)
    }

    /// File a decrypted message into the conversations tree.
    fn file_incoming(&self, message: &Message) -> Result<PathBuf, DaemonError> {
        let now = now_nanos();
        // The date is the sender's claim; clamp before it names a file.
        let date = message.date.clamp(now - DATE_CLAMP_WINDOW_NANOS, now);

        let conv_dir = self.find_or_create_conversation(message, date)?;
        let path = conv_dir.join(message_file_name(date, &message.sender));
        store::atomic_write(&self.layout, &path, &message.contents)?;
        tracing::info!(sender = %message.sender, path = %path.display(), "message delivered");
        Ok(path)
    }

    /// The existing conversation directory for this participant set and
    /// subject, if one exists. Matching is by the sorted-participant
    /// suffix (the stamp prefix is fixed-width) plus the metadata subject,
    /// so the sending and receiving side converge on one directory no
    /// matter who created it first.
    fn locate_conversation(
        &self,
        participants: &[String],
        subject: &str,
    ) -> Result<Option<PathBuf>, DaemonError> {
        let suffix = participant_suffix(participants);
        let stamp_len = conversation_stamp(0).len();

        for entry in std::fs::read_dir(self.layout.conversations())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.get(stamp_len + 1..) != Some(suffix.as_str()) {
                continue;
            }
            let metadata_path = entry.path().join(METADATA_FILE);
            let Ok(bytes) = std::fs::read(&metadata_path) else { continue };
            let Ok(metadata) = ConversationMetadata::from_bytes(&bytes) else {
                continue;
            };
            if metadata.subject == subject {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    /// Reuse the conversation directory with this participant set and
    /// subject, or create one stamped with the message date.
    fn find_or_create_conversation(
        &self,
        message: &Message,
        date_nanos: i64,
    ) -> Result<PathBuf, DaemonError> {
        if let Some(dir) =
            self.locate_conversation(&message.participants, &message.subject)?
        {
            return Ok(dir);
        }

        let dir = self
            .layout
            .conversations()
            .join(conversation_dir_name(date_nanos, &message.participants));
        std::fs::create_dir_all(&dir)?;
        let metadata = ConversationMetadata {
            participants: message.participants.clone(),
            subject: message.subject.clone(),
        };
        store::atomic_write(&self.layout, &dir.join(METADATA_FILE), &metadata.to_bytes()?)?;
        Ok(dir)
    }

    /// Sweep the outbox: send every pending message file, then move it
    /// into the conversations mirror.
    pub async fn process_outbox(&mut self) -> Result<(), DaemonError> {
        let outbox = self.layout.outbox();
        for entry in std::fs::read_dir(&outbox)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                self.process_conversation(&entry.path()).await?;
            }
        }
        Ok(())
    }

    async fn process_conversation(&mut self, dir: &Path) -> Result<(), DaemonError> {
        let metadata_path = dir.join(METADATA_FILE);
        let Ok(bytes) = std::fs::read(&metadata_path) else {
            // Not ready: the UI hasn't finished authoring it.
            return Ok(());
        };
        let metadata = ConversationMetadata::from_bytes(&bytes)?;

        let mut pending: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && entry.file_name().to_str() != Some(METADATA_FILE)
            {
                pending.push(entry.path());
            }
        }
        pending.sort();

        if pending.is_empty() {
            return Ok(());
        }

        let mirror = self.mirror_conversation(dir, &metadata)?;
        for path in pending {
            let contents = std::fs::read(&path)?;
            let date = now_nanos();
            let message = Message {
                contents,
                subject: metadata.subject.clone(),
                participants: metadata.participants.clone(),
                date,
                sender: self.config.name.clone(),
                lookup_proof: self.resolver.lookup_proof(&self.config.name),
            };

            for participant in metadata.participants.clone() {
                if participant == self.config.name {
                    continue;
                }
                self.send_to_peer(&participant, &message).await?;
            }

            let sent_name = message_file_name(date, &self.config.name);
            std::fs::rename(&path, mirror.join(sent_name))?;
            tracing::info!(conversation = %dir.display(), "message sent");
        }
        Ok(())
    }

    /// The conversations-side twin of an outbox directory. An existing
    /// directory for the same participants and subject (for instance one
    /// created by receiving) is reused; otherwise the outbox name carries
    /// over.
    fn mirror_conversation(
        &self,
        outbox_dir: &Path,
        metadata: &ConversationMetadata,
    ) -> Result<PathBuf, DaemonError> {
        if let Some(dir) =
            self.locate_conversation(&metadata.participants, &metadata.subject)?
        {
            return Ok(dir);
        }
        let name = outbox_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DaemonError::BadName(outbox_dir.display().to_string()))?;
        let dir = self.layout.conversations().join(name);
        std::fs::create_dir_all(&dir)?;
        store::atomic_write(&self.layout, &dir.join(METADATA_FILE), &metadata.to_bytes()?)?;
        Ok(dir)
    }

    /// Encrypt and deliver one message to one peer, continuing an
    /// existing session or initiating a new one via a prekey fetch.
    async fn send_to_peer(&mut self, peer: &str, message: &Message) -> Result<(), DaemonError> {
        let profile = self
            .resolver
            .resolve(peer, None)
            .map_err(DaemonError::Session)?;

        if let Some(mut ratchet) = store::load_ratchet(&self.layout, peer)? {
            let envelope = ratchet.encrypt(message, &mut OsRng)?;
            // Persist the advanced chain before the bytes leave: a crash
            // after delivery must not reuse a message counter.
            store::store_ratchet(&self.layout, peer, &ratchet)?;
            let mut foreign = ServerConnection::connect_foreign(&profile).await?;
            foreign.deliver_envelope(&profile.user_id_at_server, envelope).await?;
            foreign.close();
            tracing::debug!(peer, "continuation delivered");
        } else {
            let mut foreign = ServerConnection::connect_foreign(&profile).await?;
            let signed = foreign
                .take_signed_prekey(&profile.user_id_at_server)
                .await?
                .ok_or_else(|| DaemonError::PrekeysExhausted(peer.to_string()))?;
            let prekey_pub = verify_signed_prekey(&signed, &profile.key_signing_pub)?;

            let (ratchet, envelope) = Ratchet::encrypt_first(
                message,
                &prekey_pub,
                &profile.message_auth_pub,
                &self.config.message_auth_secret,
                &mut OsRng,
            )?;
            foreign.deliver_envelope(&profile.user_id_at_server, envelope).await?;
            foreign.close();
            // The session exists once the first envelope is on its way; a
            // crash in between costs the peer one prekey, not a session
            // they can never decrypt.
            store::store_ratchet(&self.layout, peer, &ratchet)?;
            tracing::info!(peer, "session initiated");
        }
        Ok(())
    }
}

/// Run an account's engine until shutdown or a fatal error.
pub async fn run<R: Registry>(
    root: PathBuf,
    registry: R,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), DaemonError> {
    let (mut engine, mut pushes) = Engine::start(root, registry).await?;

    // Catch up on both directions before watching for changes.
    engine.drain_mailbox().await?;
    engine.process_outbox().await?;

    let (fs_tx, mut fs_rx) = mpsc::channel::<notify::Result<notify::Event>>(64);
    let mut watcher = notify::recommended_watcher(move |event| {
        let _ = fs_tx.blocking_send(event);
    })
    .map_err(|err| DaemonError::Watch(err.to_string()))?;
    watcher
        .watch(&engine.layout.outbox(), RecursiveMode::Recursive)
        .map_err(|err| DaemonError::Watch(err.to_string()))?;

    let mut poll = tokio::time::interval(POLL_PERIOD);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    poll.tick().await; // immediate first tick

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("engine shutting down");
                return Ok(());
            }

            event = fs_rx.recv() => match event {
                None => return Err(DaemonError::Watch("watcher channel closed".to_string())),
                Some(Err(err)) => return Err(DaemonError::Watch(err.to_string())),
                Some(Ok(event)) => {
                    if !matches!(event.kind, notify::EventKind::Access(_)) {
                        engine.process_outbox().await?;
                    }
                }
            },

            envelope = pushes.recv() => match envelope {
                None => return Err(DaemonError::Disconnected),
                Some(envelope) => engine.handle_envelope(&envelope).await?,
            },

            _ = poll.tick() => {
                engine.drain_mailbox().await?;
            }
        }
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
