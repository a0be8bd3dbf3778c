//! Protocol module - wire format and framing.
//!
//! This module implements the length-prefixed framing used on the wire:
//! - 4-byte big-endian length prefix encoding/decoding
//! - Exact-read frame decoding from an async stream
//! - Incremental decoder for chunked input

mod decoder;
mod frame;
mod wire_format;

pub use decoder::FrameDecoder;
pub use frame::{read_frame, read_header, read_payload};
pub use wire_format::{
    decode_length, encode_frame, encode_frame_parts, encode_length, ABSOLUTE_MAX_PAYLOAD_SIZE,
    DEFAULT_MAX_PAYLOAD_SIZE, LENGTH_PREFIX_SIZE,
};
