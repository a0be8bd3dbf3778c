//! Kind-prefix codec - the body preceded by its 4-byte kind.
//!
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │ Kind         │ Body                 │
//! │ uint32 BE    │ rest of the payload  │
//! └──────────────┴──────────────────────┘
//! ```
//!
//! Unpacking is zero-copy: the body is a slice of the incoming payload.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Codec, Envelope, MessageKind};
use crate::error::{Result, WireError};

/// Size of the kind prefix in bytes.
pub const KIND_PREFIX_SIZE: usize = 4;

/// Codec that prefixes the body with its kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct KindPrefixCodec;

impl Codec for KindPrefixCodec {
    fn pack(&self, kind: MessageKind, body: &[u8]) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(KIND_PREFIX_SIZE + body.len());
        buf.put_u32(kind);
        buf.put_slice(body);
        Ok(buf.freeze())
    }

    fn unpack(&self, payload: &Bytes) -> Result<Envelope> {
        if payload.len() < KIND_PREFIX_SIZE {
            return Err(WireError::Unpack(format!(
                "payload of {} bytes is shorter than the {}-byte kind",
                payload.len(),
                KIND_PREFIX_SIZE
            )));
        }

        let kind = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Ok(Envelope {
            kind,
            payload: payload.clone(),
            body: payload.slice(KIND_PREFIX_SIZE..),
        })
    }
}
