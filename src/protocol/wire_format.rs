//! Wire format encoding and decoding.
//!
//! Every frame is a 4-byte length prefix followed by exactly that many
//! payload bytes:
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │ Length       │ Payload              │
//! │ 4 bytes      │ `Length` bytes       │
//! │ uint32 BE    │                      │
//! └──────────────┴──────────────────────┘
//! ```
//!
//! Frames follow each other back to back, no separators, no trailer.
//! A zero length is valid and carries no payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size accepted by readers (1 GB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_073_741_824;

/// Largest payload the prefix can describe.
pub const ABSOLUTE_MAX_PAYLOAD_SIZE: u32 = u32::MAX;

/// Encode a payload length into the 4-byte prefix.
///
/// Fails with `FrameTooLarge` when `len` does not fit in 32 bits.
#[inline]
pub fn encode_length(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    let len = u32::try_from(len).map_err(|_| WireError::FrameTooLarge {
        size: len as u64,
        max: ABSOLUTE_MAX_PAYLOAD_SIZE as u64,
    })?;
    Ok(len.to_be_bytes())
}

/// Decode a length prefix from bytes (Big Endian).
///
/// Returns `None` if buffer is too short.
///
/// # Example
///
/// ```
/// use wirelink::protocol::decode_length;
///
/// assert_eq!(decode_length(&[0, 0, 0, 5]), Some(5));
/// assert_eq!(decode_length(&[0, 0]), None);
/// ```
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<u32> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = buf.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

/// Encode a payload into a complete frame.
///
/// # Example
///
/// ```
/// use wirelink::protocol::encode_frame;
///
/// let frame = encode_frame(b"hello").unwrap();
/// assert_eq!(&frame[..], b"\x00\x00\x00\x05hello");
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let prefix = encode_length(payload.len())?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_slice(&prefix);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Encode frame parts for scatter/gather I/O.
///
/// Returns the encoded prefix and a reference to the payload, avoiding the
/// copy `encode_frame` makes.
pub fn encode_frame_parts(payload: &[u8]) -> Result<([u8; LENGTH_PREFIX_SIZE], &[u8])> {
    Ok((encode_length(payload.len())?, payload))
}

/// Reject a declared length above `max`.
#[inline]
pub(crate) fn check_length(len: u32, max: u32) -> Result<()> {
    if len > max {
        return Err(WireError::FrameTooLarge {
            size: len as u64,
            max: max as u64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(b"hello").unwrap();
        assert_eq!(frame.len(), LENGTH_PREFIX_SIZE + 5);
        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_encode_empty_payload() {
        let frame = encode_frame(b"").unwrap();
        assert_eq!(&frame[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_length_is_big_endian() {
        assert_eq!(encode_length(0x0102_0304).unwrap(), [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(decode_length(&[0x01, 0x02, 0x03, 0x04]), Some(0x0102_0304));
    }

    #[test]
    fn test_decode_length_ignores_trailing_bytes() {
        assert_eq!(decode_length(&[0, 0, 1, 0, 0xFF, 0xFF]), Some(256));
    }

    #[test]
    fn test_decode_length_short_buffer() {
        assert_eq!(decode_length(&[]), None);
        assert_eq!(decode_length(&[0, 0, 0]), None);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_encode_length_too_large() {
        let result = encode_length(u32::MAX as usize + 1);
        assert!(matches!(result, Err(WireError::FrameTooLarge { .. })));
        assert!(encode_length(u32::MAX as usize).is_ok());
    }

    #[test]
    fn test_encode_frame_parts() {
        let (prefix, payload) = encode_frame_parts(b"abc").unwrap();
        assert_eq!(prefix, [0, 0, 0, 3]);
        assert_eq!(payload, b"abc");
    }

    #[test]
    fn test_check_length() {
        assert!(check_length(100, 100).is_ok());
        let err = check_length(101, 100).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }
}
