//! Directional encrypted frame halves.

use std::time::Duration;

use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    time::timeout,
};

use crate::{Result, TransportError};

/// Liveness sentinel on frame reads. Push connections are expected to be
/// quiet for long stretches; an hour without any frame means the peer is
/// gone.
pub const READ_DEADLINE: Duration = Duration::from_secs(60 * 60);

/// AEAD tag bytes appended to each frame on the wire.
const FRAME_TAG_LEN: usize = 16;

/// Nonce for the `counter`-th frame in one direction.
///
/// Keys are per-direction, so a plain counter nonce can never collide.
fn frame_nonce(counter: u64) -> XNonce {
    let mut nonce = [0u8; 24];
    nonce[16..].copy_from_slice(&counter.to_be_bytes());
    XNonce::from(nonce)
}

/// Receiving half of a framed connection.
pub struct FrameReader {
    half: OwnedReadHalf,
    cipher: XChaCha20Poly1305,
    counter: u64,
    frame_size: usize,
    wire_buf: Vec<u8>,
}

impl FrameReader {
    pub(crate) fn new(half: OwnedReadHalf, key: &[u8; 32], frame_size: usize) -> Self {
        Self {
            half,
            cipher: XChaCha20Poly1305::new(&Key::from(*key)),
            counter: 0,
            frame_size,
            wire_buf: vec![0u8; frame_size + FRAME_TAG_LEN],
        }
    }

    /// The fixed plaintext frame size.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Read exactly one frame into `out` (which must be `frame_size` long).
    ///
    /// Applies [`READ_DEADLINE`]; frames are decrypted and authenticated
    /// before any byte reaches the caller.
    pub async fn read_frame(&mut self, out: &mut [u8]) -> Result<()> {
        if out.len() != self.frame_size {
            return Err(TransportError::WrongFrameSize {
                len: out.len(),
                expected: self.frame_size,
            });
        }
        match timeout(READ_DEADLINE, self.half.read_exact(&mut self.wire_buf)).await {
            Ok(read) => {
                read?;
            }
            Err(_) => return Err(TransportError::Deadline),
        }

        let plaintext = self
            .cipher
            .decrypt(&frame_nonce(self.counter), self.wire_buf.as_slice())
            .map_err(|_| TransportError::Crypto)?;
        self.counter += 1;
        out.copy_from_slice(&plaintext);
        Ok(())
    }
}

/// Sending half of a framed connection.
pub struct FrameWriter {
    half: OwnedWriteHalf,
    cipher: XChaCha20Poly1305,
    counter: u64,
    frame_size: usize,
}

impl FrameWriter {
    pub(crate) fn new(half: OwnedWriteHalf, key: &[u8; 32], frame_size: usize) -> Self {
        Self {
            half,
            cipher: XChaCha20Poly1305::new(&Key::from(*key)),
            counter: 0,
            frame_size,
        }
    }

    /// The fixed plaintext frame size.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Encrypt and send one frame. `frame` must be exactly `frame_size`
    /// bytes; callers pad their records first.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() != self.frame_size {
            return Err(TransportError::WrongFrameSize {
                len: frame.len(),
                expected: self.frame_size,
            });
        }
        let wire = self
            .cipher
            .encrypt(&frame_nonce(self.counter), frame)
            .map_err(|_| TransportError::Crypto)?;
        self.counter += 1;
        self.half.write_all(&wire).await?;
        Ok(())
    }
}
