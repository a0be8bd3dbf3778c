//! MsgPack codecs using `rmp-serde`.
//!
//! **Always use `to_vec_named`**: structs are written as maps with field
//! names, not as positional arrays, so peers in other languages and later
//! versions of a struct decode them by name.
//!
//! # Example
//!
//! ```
//! use wirelink::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Chat {
//!     room: u32,
//!     text: String,
//! }
//!
//! let msg = Chat { room: 42, text: "hello".to_string() };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Chat = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{Codec, Envelope, MessageKind};
use crate::error::{Result, WireError};

/// MessagePack body serializer.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the value cannot be serialized.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns `Deserialization` if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    kind: MessageKind,
    #[serde(with = "serde_bytes")]
    body: &'a [u8],
}

#[derive(Deserialize)]
struct EnvelopeOwned {
    kind: MessageKind,
    #[serde(with = "serde_bytes")]
    body: Vec<u8>,
}

/// Codec whose envelope is a MessagePack map `{kind, body}`.
///
/// Useful when the peer already speaks MessagePack everywhere. The body is
/// carried as `bin`, so it is copied out on unpack.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackEnvelopeCodec;

impl Codec for MsgPackEnvelopeCodec {
    fn pack(&self, kind: MessageKind, body: &[u8]) -> Result<Bytes> {
        let encoded = MsgPackCodec::encode(&EnvelopeRef { kind, body })?;
        Ok(Bytes::from(encoded))
    }

    fn unpack(&self, payload: &Bytes) -> Result<Envelope> {
        let envelope: EnvelopeOwned =
            rmp_serde::from_slice(payload).map_err(|e| WireError::Unpack(e.to_string()))?;

        Ok(Envelope {
            kind: envelope.kind,
            payload: payload.clone(),
            body: Bytes::from(envelope.body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TestStruct {
            id: 42,
            name: "test".to_string(),
            active: true,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: TestStruct = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_to_vec_named_produces_map_format() {
        let test = TestStruct {
            id: 1,
            name: "x".to_string(),
            active: false,
        };

        let encoded = MsgPackCodec::encode(&test).unwrap();

        // fixmap with 3 entries; positional encoding would be fixarray 0x93
        assert_eq!(encoded[0], 0x83, "Expected fixmap, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<TestStruct> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(matches!(result, Err(WireError::Deserialization(_))));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let body = MsgPackCodec::encode(&"payload").unwrap();
        let packed = MsgPackEnvelopeCodec.pack(17, &body).unwrap();

        let envelope = MsgPackEnvelopeCodec.unpack(&packed).unwrap();
        assert_eq!(envelope.kind, 17);
        assert_eq!(&envelope.body[..], &body[..]);
        assert_eq!(envelope.payload, packed);

        let decoded: String = MsgPackCodec::decode(&envelope.body).unwrap();
        assert_eq!(decoded, "payload");
    }

    #[test]
    fn test_envelope_is_named_map_with_bin_body() {
        let packed = MsgPackEnvelopeCodec.pack(1, &[0xAA]).unwrap();

        // fixmap(2) "kind" 1 "body" bin8(1) 0xAA
        assert_eq!(packed[0], 0x82);
        assert!(packed.windows(4).any(|w| w == b"kind"));
        assert!(packed.windows(3).any(|w| w == [0xc4, 0x01, 0xAA]));
    }

    #[test]
    fn test_envelope_unpack_garbage_is_unpack_error() {
        let result = MsgPackEnvelopeCodec.unpack(&Bytes::from_static(b"\xc1garbage"));
        assert!(matches!(result, Err(WireError::Unpack(_))));
    }
}
