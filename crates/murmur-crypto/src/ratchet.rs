//! The per-peer session ratchet.
//!
//! # Wire layouts
//!
//! Both envelope kinds are exactly [`MAX_MESSAGE_SIZE`] bytes; the record
//! inside is padded to fill the frame.
//!
//! First contact (sealed to a one-time prekey):
//!
//! ```text
//! [recipient prekey pub: 32] [sender ratchet pub: 32]
//! [auth tag: 32] [nonce: 24] [NaCl box ciphertext: rest]
//! ```
//!
//! Continuation (steady state):
//!
//! ```text
//! [auth tag: 32]
//! [sender ratchet pub: 32] [prev chain len: 4 BE] [counter: 4 BE]
//! [nonce: 24] [XChaCha20-Poly1305 ciphertext: rest]
//! ```
//!
//! The auth tag is HMAC-SHA-256 under the long-term shared auth key, over
//! every envelope byte after the tag field (plus the prologue for first
//! contact). The 40-byte continuation header also rides as AEAD associated
//! data, so neither layer can be spliced independently.
//!
//! # Ratchet stepping
//!
//! Receiving a header with an unseen ratchet key retires the current
//! receiving chain (surplus keys go to the skipped store) and advances the
//! root; the sending chain is regenerated lazily on the next send with a
//! fresh X25519 key. Decrypt works on a scratch copy of the state and
//! commits only after the ciphertext authenticates, so failed attempts --
//! including trial decrypts against the wrong session -- never mutate the
//! session.

use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use crypto_box::SalsaBox;
use murmur_proto::{EnvelopeHead, MAX_MESSAGE_SIZE, Message, pad, unpad};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{
    ProfileResolver, RatchetError, Result,
    auth::{AUTH_TAG_LEN, auth_tag, shared_auth_key, verify_auth_tag},
    kdf,
    skipped::SkippedKeys,
};

/// Envelope bytes that are not message record: first-contact layout.
/// prologue (64) + tag (32) + nonce (24) + AEAD tag (16).
pub const FIRST_CONTACT_OVERHEAD: usize = 64 + AUTH_TAG_LEN + NONCE_LEN + AEAD_TAG_LEN;

/// Envelope bytes that are not message record: continuation layout.
/// tag (32) + header (40) + nonce (24) + AEAD tag (16).
pub const CONTINUATION_OVERHEAD: usize = AUTH_TAG_LEN + HEADER_LEN + NONCE_LEN + AEAD_TAG_LEN;

const NONCE_LEN: usize = 24;
const AEAD_TAG_LEN: usize = 16;
const HEADER_LEN: usize = 32 + 4 + 4;

/// One direction of the symmetric ratchet: the chain key plus the counter
/// of the next message key it will produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainState {
    key: [u8; 32],
    next: u32,
}

impl ChainState {
    /// Produce the message key at `self.next` and advance.
    fn step(&mut self) -> [u8; 32] {
        let mk = kdf::message_key(&self.key);
        let next_key = kdf::next_chain_key(&self.key);
        self.key.zeroize();
        self.key = next_key;
        self.next += 1;
        mk
    }
}

/// Per-peer session state.
///
/// Created by [`Ratchet::encrypt_first`] or [`Ratchet::decrypt_first`],
/// then advanced by every [`encrypt`](Ratchet::encrypt) and every
/// successful [`decrypt`](Ratchet::decrypt). Persist with
/// [`to_bytes`](Ratchet::to_bytes) after each mutation; a reloaded copy
/// behaves identically (modulo randomness consumed by later sends).
#[derive(Clone, Serialize, Deserialize)]
pub struct Ratchet {
    root_key: [u8; 32],
    dh_self_secret: [u8; 32],
    dh_remote: [u8; 32],
    send: Option<ChainState>,
    recv: Option<ChainState>,
    prev_send_count: u32,
    skipped: SkippedKeys,
    shared_auth: [u8; 32],
    peer_auth_pub: [u8; 32],
}

impl Ratchet {
    /// Initiate a session: seal `msg` to a peer's one-time prekey.
    ///
    /// `their_auth_pub` is the peer's registered message-auth key (the
    /// sender resolves it from the registry before first contact);
    /// `our_auth_sk` is our own long-term auth secret. Returns the new
    /// session and the first-contact envelope.
    pub fn encrypt_first(
        msg: &Message,
        their_prekey_pub: &[u8; 32],
        their_auth_pub: &[u8; 32],
        our_auth_sk: &[u8; 32],
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<(Self, Vec<u8>)> {
        let record = msg.to_bytes()?;
        let padded = pad(&record, MAX_MESSAGE_SIZE - FIRST_CONTACT_OVERHEAD)?;

        let eph = StaticSecret::random_from_rng(&mut *rng);
        let eph_pub = PublicKey::from(&eph);
        let shared_secret =
            eph.diffie_hellman(&PublicKey::from(*their_prekey_pub)).to_bytes();

        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        let sealer = SalsaBox::new(
            &crypto_box::PublicKey::from(*their_prekey_pub),
            &crypto_box::SecretKey::from(eph.to_bytes()),
        );
        let boxct = sealer
            .encrypt(&crypto_box::Nonce::from(nonce), padded.as_slice())
            .map_err(|_| RatchetError::AeadFailure)?;

        let shared_auth = shared_auth_key(our_auth_sk, their_auth_pub);

        let mut envelope = Vec::with_capacity(MAX_MESSAGE_SIZE);
        envelope.extend_from_slice(their_prekey_pub);
        envelope.extend_from_slice(eph_pub.as_bytes());
        let tag = auth_tag(&shared_auth, &[&envelope[..64], &nonce, &boxct]);
        envelope.extend_from_slice(&tag);
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&boxct);
        debug_assert_eq!(envelope.len(), MAX_MESSAGE_SIZE);

        let root = kdf::initial_root(&shared_secret);
        let (root, send_key) = kdf::advance_root(&root, &shared_secret);

        let ratchet = Self {
            root_key: root,
            dh_self_secret: eph.to_bytes(),
            dh_remote: *their_prekey_pub,
            send: Some(ChainState { key: send_key, next: 0 }),
            recv: None,
            prev_send_count: 0,
            skipped: SkippedKeys::default(),
            shared_auth,
            peer_auth_pub: *their_auth_pub,
        };
        Ok((ratchet, envelope))
    }

    /// Accept a first-contact envelope sealed to `prekey_sk`.
    ///
    /// Order matters: the box is opened first, the claimed sender name is
    /// resolved through `resolver`, and only then is the auth tag checked
    /// against the resolved identity. Any failure leaves no session.
    pub fn decrypt_first(
        envelope: &[u8],
        prekey_sk: &[u8; 32],
        our_auth_sk: &[u8; 32],
        resolver: &mut dyn ProfileResolver,
    ) -> Result<(Self, Message)> {
        if envelope.len() < FIRST_CONTACT_OVERHEAD + 1 {
            return Err(RatchetError::ShortInput {
                need: FIRST_CONTACT_OVERHEAD + 1,
                have: envelope.len(),
            });
        }
        let head = EnvelopeHead::parse(envelope)?;
        let tag = &envelope[64..96];
        let nonce = &envelope[96..96 + NONCE_LEN];
        let boxct = &envelope[96 + NONCE_LEN..];

        let opener = SalsaBox::new(
            &crypto_box::PublicKey::from(head.ratchet_pub),
            &crypto_box::SecretKey::from(*prekey_sk),
        );
        let padded = opener
            .decrypt(crypto_box::Nonce::from_slice(nonce), boxct)
            .map_err(|_| RatchetError::AeadFailure)?;
        let record = unpad(&padded)?;
        let msg = Message::from_bytes(record)?;

        let profile = resolver.resolve(&msg.sender, msg.lookup_proof.as_ref())?;
        let shared_auth = shared_auth_key(our_auth_sk, &profile.message_auth_pub);
        verify_auth_tag(
            &shared_auth,
            &[&envelope[..64], &envelope[96..]],
            tag,
        )?;

        let shared_secret = StaticSecret::from(*prekey_sk)
            .diffie_hellman(&PublicKey::from(head.ratchet_pub))
            .to_bytes();
        let root = kdf::initial_root(&shared_secret);
        let (root, recv_key) = kdf::advance_root(&root, &shared_secret);

        let ratchet = Self {
            root_key: root,
            dh_self_secret: *prekey_sk,
            dh_remote: head.ratchet_pub,
            send: None,
            recv: Some(ChainState { key: recv_key, next: 0 }),
            prev_send_count: 0,
            skipped: SkippedKeys::default(),
            shared_auth,
            peer_auth_pub: profile.message_auth_pub,
        };
        Ok((ratchet, msg))
    }

    /// Encrypt a steady-state message.
    pub fn encrypt(
        &mut self,
        msg: &Message,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Vec<u8>> {
        let record = msg.to_bytes()?;
        let padded = pad(&record, MAX_MESSAGE_SIZE - CONTINUATION_OVERHEAD)?;

        if self.send.is_none() {
            // First send since the last received ratchet step: fresh key,
            // fresh sending chain.
            let fresh = StaticSecret::random_from_rng(&mut *rng);
            let dh = fresh.diffie_hellman(&PublicKey::from(self.dh_remote)).to_bytes();
            let (root, ck) = kdf::advance_root(&self.root_key, &dh);
            self.root_key.zeroize();
            self.root_key = root;
            self.dh_self_secret.zeroize();
            self.dh_self_secret = fresh.to_bytes();
            self.send = Some(ChainState { key: ck, next: 0 });
        }
        let Some(chain) = self.send.as_mut() else {
            unreachable!("send chain was just ensured above");
        };

        let counter = chain.next;
        let mk = chain.step();

        let self_pub = PublicKey::from(&StaticSecret::from(self.dh_self_secret));
        let mut header = [0u8; HEADER_LEN];
        header[..32].copy_from_slice(self_pub.as_bytes());
        header[32..36].copy_from_slice(&self.prev_send_count.to_be_bytes());
        header[36..40].copy_from_slice(&counter.to_be_bytes());

        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        let cipher = XChaCha20Poly1305::new(&Key::from(mk));
        let ct = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload { msg: padded.as_slice(), aad: &header },
            )
            .map_err(|_| RatchetError::AeadFailure)?;

        let tag = auth_tag(&self.shared_auth, &[&header, &nonce, &ct]);

        let mut envelope = Vec::with_capacity(MAX_MESSAGE_SIZE);
        envelope.extend_from_slice(&tag);
        envelope.extend_from_slice(&header);
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ct);
        debug_assert_eq!(envelope.len(), MAX_MESSAGE_SIZE);
        Ok(envelope)
    }

    /// Decrypt a steady-state envelope.
    ///
    /// The auth tag is checked before any key derivation; a mismatch means
    /// either "wrong session" (during classification) or a rotated peer
    /// identity, and in both cases the session is left untouched.
    pub fn decrypt(&mut self, envelope: &[u8]) -> Result<Message> {
        if envelope.len() < CONTINUATION_OVERHEAD + 1 {
            return Err(RatchetError::ShortInput {
                need: CONTINUATION_OVERHEAD + 1,
                have: envelope.len(),
            });
        }
        let tag = &envelope[..AUTH_TAG_LEN];
        let body = &envelope[AUTH_TAG_LEN..];
        verify_auth_tag(&self.shared_auth, &[body], tag)?;

        let header = &body[..HEADER_LEN];
        let mut hpub = [0u8; 32];
        hpub.copy_from_slice(&header[..32]);
        let prev_count = read_u32(&header[32..36]);
        let counter = read_u32(&header[36..40]);
        let nonce = &body[HEADER_LEN..HEADER_LEN + NONCE_LEN];
        let ct = &body[HEADER_LEN + NONCE_LEN..];

        // Derive on a scratch copy; commit only after the AEAD verifies.
        let mut work = self.clone();
        let mk = work.message_key_for(hpub, prev_count, counter)?;

        let cipher = XChaCha20Poly1305::new(&Key::from(mk));
        let padded = cipher
            .decrypt(XNonce::from_slice(nonce), Payload { msg: ct, aad: header })
            .map_err(|_| RatchetError::AeadFailure)?;
        let record = unpad(&padded)?;
        let msg = Message::from_bytes(record)?;

        *self = work;
        Ok(msg)
    }

    /// The peer auth public key this session is bound to.
    pub fn peer_auth_pub(&self) -> [u8; 32] {
        self.peer_auth_pub
    }

    /// Serialize the session state.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| RatchetError::Encoding(e.to_string()))?;
        Ok(out)
    }

    /// Restore a session from [`to_bytes`](Self::to_bytes) output.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| RatchetError::Encoding(e.to_string()))
    }

    /// Locate or derive the message key for `(hpub, counter)`.
    fn message_key_for(&mut self, hpub: [u8; 32], prev_count: u32, counter: u32) -> Result<[u8; 32]> {
        if let Some(mk) = self.skipped.take(&hpub, counter) {
            return Ok(mk);
        }

        if hpub != self.dh_remote {
            // The peer stepped: bank the rest of the current chain, then
            // advance the root with the new key.
            self.retire_recv_chain(prev_count)?;

            let dh = StaticSecret::from(self.dh_self_secret)
                .diffie_hellman(&PublicKey::from(hpub))
                .to_bytes();
            let (root, ck) = kdf::advance_root(&self.root_key, &dh);
            self.root_key.zeroize();
            self.root_key = root;
            self.prev_send_count = self.send.as_ref().map_or(0, |c| c.next);
            self.send = None;
            self.dh_remote = hpub;
            self.recv = Some(ChainState { key: ck, next: 0 });
        }

        let Some(chain) = self.recv.as_mut() else {
            // No receiving chain can exist for this key: the counter is
            // behind a key that was never derived.
            return Err(RatchetError::OutOfOrder { counter });
        };
        if counter < chain.next {
            // The key for this counter was consumed (or never banked).
            return Err(RatchetError::OutOfOrder { counter });
        }
        while chain.next < counter {
            let skipped_counter = chain.next;
            let mk = chain.step();
            self.skipped.insert(self.dh_remote, skipped_counter, mk)?;
        }
        Ok(chain.step())
    }

    /// Bank the remaining keys of the current receiving chain up to the
    /// peer-announced chain length.
    fn retire_recv_chain(&mut self, chain_len: u32) -> Result<()> {
        let old_remote = self.dh_remote;
        if let Some(chain) = self.recv.as_mut() {
            while chain.next < chain_len {
                let counter = chain.next;
                let mk = chain.step();
                self.skipped.insert(old_remote, counter, mk)?;
            }
        }
        self.recv = None;
        Ok(())
    }
}

impl Drop for Ratchet {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.dh_self_secret.zeroize();
        self.shared_auth.zeroize();
        if let Some(chain) = self.send.as_mut() {
            chain.key.zeroize();
        }
        if let Some(chain) = self.recv.as_mut() {
            chain.key.zeroize();
        }
        self.skipped.zeroize_keys();
    }
}

impl std::fmt::Debug for Ratchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("Ratchet")
            .field("send_count", &self.send.as_ref().map(|c| c.next))
            .field("recv_count", &self.recv.as_ref().map(|c| c.next))
            .field("skipped", &self.skipped.len())
            .finish_non_exhaustive()
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}
