//! Codec module - message envelopes, body serialization and kind naming.
//!
//! A frame payload is an *envelope*: the message kind plus the serialized
//! message body. This module provides:
//!
//! - [`Codec`] - packs/unpacks envelopes; one per application protocol
//! - [`KindPrefixCodec`] - 4-byte big-endian kind followed by the body (default)
//! - [`MsgPackEnvelopeCodec`] - MessagePack map `{kind, body}`
//! - [`MsgPackCodec`] - body serializer (`rmp-serde`, struct-as-map)
//! - [`KindRegistry`] - maps message names to stable numeric kinds
//!
//! # Example
//!
//! ```
//! use wirelink::codec::{Codec, KindPrefixCodec, MsgPackCodec};
//!
//! let body = MsgPackCodec::encode(&"hello").unwrap();
//! let payload = KindPrefixCodec.pack(7, &body).unwrap();
//!
//! let envelope = KindPrefixCodec.unpack(&payload).unwrap();
//! assert_eq!(envelope.kind, 7);
//! let decoded: String = MsgPackCodec::decode(&envelope.body).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod kind_prefix;
mod kinds;
mod msgpack;

use bytes::Bytes;

use crate::error::Result;

pub use kind_prefix::{KindPrefixCodec, KIND_PREFIX_SIZE};
pub use kinds::KindRegistry;
pub use msgpack::{MsgPackCodec, MsgPackEnvelopeCodec};

/// Numeric identifier of an application message type, used for routing.
pub type MessageKind = u32;

/// Reserved kind (never dispatched).
pub const RESERVED_KIND: MessageKind = 0;

/// An application message that can be sent over a connection.
///
/// `NAME` is looked up in a [`KindRegistry`] to find the kind written on
/// the wire.
pub trait Message: serde::Serialize {
    /// Stable message name, shared by both peers.
    const NAME: &'static str;
}

/// A payload split into its kind and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Message kind recovered from the payload.
    pub kind: MessageKind,
    /// The complete payload as it arrived on the wire.
    pub payload: Bytes,
    /// Serialized message body (without the envelope header).
    pub body: Bytes,
}

impl Envelope {
    /// True for kinds that may reach the router.
    #[inline]
    pub fn is_routable(&self) -> bool {
        self.kind != RESERVED_KIND
    }
}

/// Packs message bodies into payload envelopes and back.
///
/// Implementations must be deterministic and stateless from the
/// connection's point of view; one codec is shared by every pump.
pub trait Codec: Send + Sync + 'static {
    /// Wrap a serialized body with its kind.
    fn pack(&self, kind: MessageKind, body: &[u8]) -> Result<Bytes>;

    /// Recover the kind from a payload.
    ///
    /// # Errors
    ///
    /// Returns `Unpack` if the payload is malformed.
    fn unpack(&self, payload: &Bytes) -> Result<Envelope>;
}
