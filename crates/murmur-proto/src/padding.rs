//! Fixed-size record padding.
//!
//! Every record is padded to its frame size before the transport sees it:
//! append a single `0x80`, then zero-fill. Unpadding strips trailing zeros
//! and requires the `0x80` terminator. The scheme is deterministic and
//! unambiguous for any input up to `frame_size - 1` bytes.
//!
//! # Invariants
//!
//! - `unpad(pad(m, n)) == m` for all `m` with `m.len() <= n - 1`.
//! - `unpad` rejects any buffer that does not end in `0x80` then zeros,
//!   including the empty buffer and all-zero buffers.

use crate::{ProtocolError, Result};

/// Terminator byte separating content from zero fill.
const PAD_MARKER: u8 = 0x80;

/// Pad `msg` to exactly `frame_size` bytes.
pub fn pad(msg: &[u8], frame_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(frame_size);
    out.extend_from_slice(msg);
    pad_into(&mut out, frame_size)?;
    Ok(out)
}

/// Pad `buf` in place to exactly `frame_size` bytes.
pub fn pad_into(buf: &mut Vec<u8>, frame_size: usize) -> Result<()> {
    if buf.len() + 1 > frame_size {
        return Err(ProtocolError::Oversize { len: buf.len(), frame_size });
    }
    buf.push(PAD_MARKER);
    buf.resize(frame_size, 0);
    Ok(())
}

/// Strip padding, returning the original content slice.
pub fn unpad(buf: &[u8]) -> Result<&[u8]> {
    let mut end = buf.len();
    while end > 0 && buf[end - 1] == 0 {
        end -= 1;
    }
    if end == 0 || buf[end - 1] != PAD_MARKER {
        return Err(ProtocolError::BadPadding);
    }
    Ok(&buf[..end - 1])
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn pad_produces_fixed_size() {
        let padded = pad(b"hello", 64).unwrap();
        assert_eq!(padded.len(), 64);
        assert_eq!(&padded[..5], b"hello");
        assert_eq!(padded[5], PAD_MARKER);
        assert!(padded[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversize_input_rejected() {
        // One byte of marker must always fit.
        assert!(pad(&[0u8; 64], 64).is_err());
        assert!(pad(&[0u8; 63], 64).is_ok());
    }

    #[test]
    fn unpad_rejects_missing_marker() {
        assert!(unpad(&[]).is_err());
        assert!(unpad(&[0, 0, 0, 0]).is_err());
        assert!(unpad(&[1, 2, 3]).is_err());
    }

    #[test]
    fn content_ending_in_marker_survives() {
        // The terminator is the *last* 0x80 before the zero fill; content
        // bytes equal to the marker are preserved.
        let padded = pad(&[PAD_MARKER, PAD_MARKER], 16).unwrap();
        assert_eq!(unpad(&padded).unwrap(), &[PAD_MARKER, PAD_MARKER]);
    }

    proptest! {
        #[test]
        fn pad_unpad_identity(msg in proptest::collection::vec(any::<u8>(), 0..=255)) {
            let padded = pad(&msg, 256).unwrap();
            prop_assert_eq!(padded.len(), 256);
            prop_assert_eq!(unpad(&padded).unwrap(), msg.as_slice());
        }

        #[test]
        fn unpad_never_panics(buf in proptest::collection::vec(any::<u8>(), 0..=256)) {
            let _ = unpad(&buf);
        }
    }
}
