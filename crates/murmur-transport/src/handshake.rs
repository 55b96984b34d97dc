//! X25519 channel establishment.

use crypto_box::{SalsaBox, aead::Aead};
use hkdf::Hkdf;
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{FrameReader, FrameWriter, Result, TransportError};

/// Wire size of the client hello:
/// eph pub (32) + nonce (24) + boxed static pub (32 + 16).
const HELLO_LEN: usize = 32 + 24 + 32 + 16;

/// Info string for directional key derivation.
const KEY_INFO: &[u8] = b"murmur-transport-keys-v1";

/// Derive the two directional keys from the handshake DH outputs.
fn session_keys(
    dh_ee: [u8; 32],
    dh_cs_f: [u8; 32],
    dh_e_s: [u8; 32],
) -> ([u8; 32], [u8; 32]) {
    let mut ikm = [0u8; 96];
    ikm[..32].copy_from_slice(&dh_ee);
    ikm[32..64].copy_from_slice(&dh_cs_f);
    ikm[64..].copy_from_slice(&dh_e_s);

    let hk = Hkdf::<Sha256>::new(None, &ikm);
    let mut okm = [0u8; 64];
    let Ok(()) = hk.expand(KEY_INFO, &mut okm) else {
        unreachable!("64 bytes is a valid HKDF-SHA256 output length");
    };
    let mut client_to_server = [0u8; 32];
    let mut server_to_client = [0u8; 32];
    client_to_server.copy_from_slice(&okm[..32]);
    server_to_client.copy_from_slice(&okm[32..]);
    (client_to_server, server_to_client)
}

/// Connect-side handshake.
///
/// `client_identity` is the caller's static transport secret; `None` uses
/// a fresh anonymous key, which is how envelopes are deposited into
/// foreign mailboxes without linking the depositor to an account.
///
/// Returns the framed halves; the peer server is authenticated against
/// `server_pub` implicitly (a server without the matching secret cannot
/// produce a frame that authenticates).
pub async fn client_handshake(
    stream: TcpStream,
    server_pub: &[u8; 32],
    client_identity: Option<&[u8; 32]>,
    frame_size: usize,
) -> Result<(FrameReader, FrameWriter)> {
    let static_secret = match client_identity {
        Some(bytes) => StaticSecret::from(*bytes),
        None => StaticSecret::random_from_rng(OsRng),
    };
    let static_pub = PublicKey::from(&static_secret);

    let eph = StaticSecret::random_from_rng(OsRng);
    let eph_pub = PublicKey::from(&eph);

    let mut stream = stream;
    stream.set_nodelay(true)?;

    // hello: eph pub, then our static pub boxed to the server key.
    let mut nonce = [0u8; 24];
    OsRng.fill_bytes(&mut nonce);
    let sealer = SalsaBox::new(
        &crypto_box::PublicKey::from(*server_pub),
        &crypto_box::SecretKey::from(eph.to_bytes()),
    );
    let boxed = sealer
        .encrypt(&crypto_box::Nonce::from(nonce), static_pub.as_bytes().as_slice())
        .map_err(|_| TransportError::Crypto)?;

    let mut hello = Vec::with_capacity(HELLO_LEN);
    hello.extend_from_slice(eph_pub.as_bytes());
    hello.extend_from_slice(&nonce);
    hello.extend_from_slice(&boxed);
    debug_assert_eq!(hello.len(), HELLO_LEN);
    stream.write_all(&hello).await?;

    // server eph reply
    let mut server_eph = [0u8; 32];
    stream.read_exact(&mut server_eph).await?;
    let server_eph_pub = PublicKey::from(server_eph);

    let dh_ee = eph.diffie_hellman(&server_eph_pub).to_bytes();
    let dh_cs_f = static_secret.diffie_hellman(&server_eph_pub).to_bytes();
    let dh_e_s = eph.diffie_hellman(&PublicKey::from(*server_pub)).to_bytes();
    let (key_c2s, key_s2c) = session_keys(dh_ee, dh_cs_f, dh_e_s);

    let (read_half, write_half) = stream.into_split();
    Ok((
        FrameReader::new(read_half, &key_s2c, frame_size),
        FrameWriter::new(write_half, &key_c2s, frame_size),
    ))
}

/// Accept-side handshake.
///
/// Returns the framed halves and the peer UID: the client's static public
/// key. Possession of the matching secret is the client's entire identity
/// to the server.
pub async fn server_handshake(
    stream: TcpStream,
    server_secret: &[u8; 32],
    frame_size: usize,
) -> Result<(FrameReader, FrameWriter, [u8; 32])> {
    let server_static = StaticSecret::from(*server_secret);

    let eph = StaticSecret::random_from_rng(OsRng);
    let eph_pub = PublicKey::from(&eph);

    let mut stream = stream;
    stream.set_nodelay(true)?;

    let mut hello = [0u8; HELLO_LEN];
    stream.read_exact(&mut hello).await?;

    let mut client_eph = [0u8; 32];
    client_eph.copy_from_slice(&hello[..32]);
    let client_eph_pub = PublicKey::from(client_eph);
    let nonce = &hello[32..56];
    let boxed = &hello[56..];

    let opener = SalsaBox::new(
        &crypto_box::PublicKey::from(client_eph),
        &crypto_box::SecretKey::from(server_static.to_bytes()),
    );
    let static_pub_bytes = opener
        .decrypt(crypto_box::Nonce::from_slice(nonce), boxed)
        .map_err(|_| TransportError::Crypto)?;
    let uid: [u8; 32] =
        static_pub_bytes.as_slice().try_into().map_err(|_| TransportError::Crypto)?;

    stream.write_all(eph_pub.as_bytes()).await?;

    let dh_ee = eph.diffie_hellman(&client_eph_pub).to_bytes();
    let dh_cs_f = eph.diffie_hellman(&PublicKey::from(uid)).to_bytes();
    let dh_e_s = server_static.diffie_hellman(&client_eph_pub).to_bytes();
    let (key_c2s, key_s2c) = session_keys(dh_ee, dh_cs_f, dh_e_s);

    tracing::trace!(frame_size, "transport handshake complete");

    let (read_half, write_half) = stream.into_split();
    Ok((
        FrameReader::new(read_half, &key_c2s, frame_size),
        FrameWriter::new(write_half, &key_s2c, frame_size),
        uid,
    ))
}
