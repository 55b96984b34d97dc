//! Two daemons, one mailbox server, one registry: the full message path.

use std::{path::PathBuf, time::Duration};

use chrono::Utc;
use murmur_daemon::{AccountConfig, Engine, connection::ServerConnection, outbox, paths::Layout};
use murmur_registry::InProcessRegistry;
use murmur_server::{MailboxStore, Server};
use rand::rngs::OsRng;
use tempfile::TempDir;
use tokio::{sync::mpsc, time::timeout};
use x25519_dalek::{PublicKey, StaticSecret};

struct World {
    server: Server,
    server_pk: [u8; 32],
    registry: InProcessRegistry,
    _server_dir: TempDir,
}

impl World {
    async fn start() -> Self {
        let server_dir = tempfile::tempdir().unwrap();
        let store = MailboxStore::open(server_dir.path().join("mailbox.redb")).unwrap();
        let secret = StaticSecret::random_from_rng(OsRng);
        let server_pk = PublicKey::from(&secret).to_bytes();
        let server =
            Server::start(store, secret.to_bytes(), "127.0.0.1:0").await.unwrap();
        Self {
            server,
            server_pk,
            registry: InProcessRegistry::new(),
            _server_dir: server_dir,
        }
    }

    /// Create an account root and register its profile.
    fn account(&self, name: &str) -> (TempDir, AccountConfig) {
        let root = tempfile::tempdir().unwrap();
        let layout = Layout::new(root.path().to_path_buf());
        layout.init_fs().unwrap();
        let config = AccountConfig::generate(
            name,
            &self.server.local_addr().to_string(),
            self.server_pk,
            self.registry.public_key(),
            &mut OsRng,
        );
        config.save(&layout).unwrap();
        self.registry.register(name, config.build_profile().unwrap());
        (root, config)
    }

    async fn engine(
        &self,
        root: &TempDir,
    ) -> (Engine<InProcessRegistry>, mpsc::Receiver<Vec<u8>>) {
        Engine::start(root.path().to_path_buf(), self.registry.clone()).await.unwrap()
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap()
}

async fn next_push(pushes: &mut mpsc::Receiver<Vec<u8>>) -> Vec<u8> {
    timeout(Duration::from_secs(10), pushes.recv())
        .await
        .expect("push should arrive")
        .expect("push channel open")
}

/// Conversation directories under an engine's conversations tree.
fn conversation_dirs(layout: &Layout) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(layout.conversations())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Message files (non-metadata) in a conversation directory.
fn message_files(dir: &std::path::Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_name() != "metadata")
        .map(|e| {
            (e.file_name().into_string().unwrap(), std::fs::read(e.path()).unwrap())
        })
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn registration_and_first_message() {
    let world = World::start().await;
    let (alice_root, _) = world.account("alice");
    let (bob_root, _) = world.account("bob");

    let (mut bob, mut bob_pushes) = world.engine(&bob_root).await;
    assert_eq!(bob.server_prekey_count().await.unwrap(), 100);
    assert_eq!(bob.pool_len(), 100);

    let (mut alice, _alice_pushes) = world.engine(&alice_root).await;

    outbox::spawn_conversation(
        alice.layout(),
        now_nanos(),
        "",
        &["alice".to_string(), "bob".to_string()],
        &[b"hi".to_vec()],
    )
    .unwrap();
    alice.process_outbox().await.unwrap();

    let envelope = next_push(&mut bob_pushes).await;
    bob.handle_envelope(&envelope).await.unwrap();

    // One prekey consumed server-side and locally.
    assert_eq!(bob.server_prekey_count().await.unwrap(), 99);
    assert_eq!(bob.pool_len(), 99);

    // Bob filed the message under <ts>-alice-bob from alice.
    let dirs = conversation_dirs(bob.layout());
    assert_eq!(dirs.len(), 1);
    let dir_name = dirs[0].file_name().unwrap().to_str().unwrap();
    assert!(dir_name.ends_with("-alice-bob"), "got {dir_name}");
    let files = message_files(&dirs[0]);
    assert_eq!(files.len(), 1);
    assert!(files[0].0.ends_with("-alice"), "got {}", files[0].0);
    assert_eq!(files[0].1, b"hi");

    // Both sides persisted a session.
    assert!(murmur_daemon::store::load_ratchet(alice.layout(), "bob").unwrap().is_some());
    assert!(murmur_daemon::store::load_ratchet(bob.layout(), "alice").unwrap().is_some());

    // Alice's outbox file moved into her sent mirror.
    let alice_dirs = conversation_dirs(alice.layout());
    assert_eq!(alice_dirs.len(), 1);
    let sent = message_files(&alice_dirs[0]);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.ends_with("-alice"));
    assert_eq!(sent[0].1, b"hi");

    // The acknowledged envelope is gone from the mailbox.
    assert!(bob.drain_mailbox().await.is_ok());

    world.server.stop().await;
}

#[tokio::test]
async fn continuation_consumes_no_prekeys() {
    let world = World::start().await;
    let (alice_root, _) = world.account("alice");
    let (bob_root, _) = world.account("bob");

    let (mut bob, mut bob_pushes) = world.engine(&bob_root).await;
    let (mut alice, mut alice_pushes) = world.engine(&alice_root).await;
    let participants = vec!["alice".to_string(), "bob".to_string()];

    // First contact: alice -> bob.
    outbox::spawn_conversation(alice.layout(), now_nanos(), "", &participants, &[b"hi".to_vec()])
        .unwrap();
    alice.process_outbox().await.unwrap();
    let envelope = next_push(&mut bob_pushes).await;
    bob.handle_envelope(&envelope).await.unwrap();

    // Bob replies twice over the established session.
    outbox::spawn_conversation(
        bob.layout(),
        now_nanos(),
        "",
        &participants,
        &[b"reply one".to_vec(), b"reply two".to_vec()],
    )
    .unwrap();
    bob.process_outbox().await.unwrap();

    for _ in 0..2 {
        let envelope = next_push(&mut alice_pushes).await;
        alice.handle_envelope(&envelope).await.unwrap();
    }

    // No prekey was touched in either direction beyond the first contact.
    assert_eq!(alice.server_prekey_count().await.unwrap(), 100);
    assert_eq!(bob.server_prekey_count().await.unwrap(), 99);

    // Everything converged into a single conversation directory per side.
    let alice_dirs = conversation_dirs(alice.layout());
    assert_eq!(alice_dirs.len(), 1);
    let alice_files = message_files(&alice_dirs[0]);
    // Sent "hi" plus two received replies.
    assert_eq!(alice_files.len(), 3);
    let contents: Vec<&[u8]> = alice_files.iter().map(|(_, c)| c.as_slice()).collect();
    assert!(contents.contains(&b"hi".as_slice()));
    assert!(contents.contains(&b"reply one".as_slice()));
    assert!(contents.contains(&b"reply two".as_slice()));

    let bob_dirs = conversation_dirs(bob.layout());
    assert_eq!(bob_dirs.len(), 1, "bob's sent mirror reuses the received conversation");
    assert_eq!(message_files(&bob_dirs[0]).len(), 3);

    world.server.stop().await;
}

#[tokio::test]
async fn prekey_pool_tops_up_below_minimum() {
    let world = World::start().await;
    let (carol_root, carol_config) = world.account("carol");

    let (mut carol, _pushes) = world.engine(&carol_root).await;
    assert_eq!(carol.server_prekey_count().await.unwrap(), 100);

    // Strangers drain 51 prekeys.
    let profile = carol_config.chat_profile();
    let mut stranger = ServerConnection::connect_foreign(&profile).await.unwrap();
    for _ in 0..51 {
        let taken = stranger
            .take_signed_prekey(&profile.user_id_at_server)
            .await
            .unwrap();
        assert!(taken.is_some());
    }
    assert_eq!(carol.server_prekey_count().await.unwrap(), 49);

    // Below the minimum: refill back to the maximum.
    carol.top_up_prekeys().await.unwrap();
    assert_eq!(carol.server_prekey_count().await.unwrap(), 100);

    // At or above the minimum: no-op.
    carol.top_up_prekeys().await.unwrap();
    assert_eq!(carol.server_prekey_count().await.unwrap(), 100);

    world.server.stop().await;
}

#[tokio::test]
async fn offline_recipient_drains_mailbox_on_startup() {
    let world = World::start().await;
    let (alice_root, _) = world.account("alice");
    let (bob_root, _) = world.account("bob");

    // Bob comes online once to publish prekeys, then goes away.
    {
        let (bob, _pushes) = world.engine(&bob_root).await;
        assert_eq!(bob.pool_len(), 100);
    }

    let (mut alice, _alice_pushes) = world.engine(&alice_root).await;
    outbox::spawn_conversation(
        alice.layout(),
        now_nanos(),
        "while you were out",
        &["alice".to_string(), "bob".to_string()],
        &[b"stored for later".to_vec()],
    )
    .unwrap();
    alice.process_outbox().await.unwrap();

    // Bob returns and catches up by polling.
    let (mut bob, _bob_pushes) = world.engine(&bob_root).await;
    bob.drain_mailbox().await.unwrap();

    let dirs = conversation_dirs(bob.layout());
    assert_eq!(dirs.len(), 1);
    let files = message_files(&dirs[0]);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].1, b"stored for later");

    // Handled envelopes were deleted; a second drain is a no-op.
    bob.drain_mailbox().await.unwrap();
    assert_eq!(message_files(&dirs[0]).len(), 1);

    world.server.stop().await;
}

#[tokio::test]
async fn garbage_envelopes_are_skipped_not_fatal() {
    let world = World::start().await;
    let (bob_root, bob_config) = world.account("bob");
    let (mut bob, mut bob_pushes) = world.engine(&bob_root).await;

    let profile = bob_config.chat_profile();
    let mut stranger = ServerConnection::connect_foreign(&profile).await.unwrap();
    stranger
        .deliver_envelope(&profile.user_id_at_server, vec![0x5A; 16384])
        .await
        .unwrap();

    let envelope = next_push(&mut bob_pushes).await;
    // Matches no prekey and no session: logged and skipped.
    bob.handle_envelope(&envelope).await.unwrap();
    assert!(conversation_dirs(bob.layout()).is_empty());

    // The engine is still fully operational.
    assert_eq!(bob.server_prekey_count().await.unwrap(), 100);

    world.server.stop().await;
}

#[tokio::test]
async fn sender_sees_exhausted_prekey_pool() {
    let world = World::start().await;
    let (alice_root, _) = world.account("alice");
    let (dave_root, dave_config) = world.account("dave");

    // Dave publishes prekeys, then strangers drain the pool completely.
    {
        let (_dave, _pushes) = world.engine(&dave_root).await;
    }
    let profile = dave_config.chat_profile();
    let mut stranger = ServerConnection::connect_foreign(&profile).await.unwrap();
    while stranger
        .take_signed_prekey(&profile.user_id_at_server)
        .await
        .unwrap()
        .is_some()
    {}

    let (mut alice, _pushes) = world.engine(&alice_root).await;
    outbox::spawn_conversation(
        alice.layout(),
        now_nanos(),
        "",
        &["alice".to_string(), "dave".to_string()],
        &[b"anyone there?".to_vec()],
    )
    .unwrap();
    let err = alice.process_outbox().await.unwrap_err();
    assert!(matches!(err, murmur_daemon::DaemonError::PrekeysExhausted(_)));

    world.server.stop().await;
}
