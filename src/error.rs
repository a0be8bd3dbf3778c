//! Error types for wirelink.

use thiserror::Error;

use crate::codec::MessageKind;

/// Main error type for all wirelink operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// I/O error while reading or writing the transport.
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream in the middle of a frame (or before one).
    #[error("stream closed")]
    StreamClosed,

    /// Payload does not fit the 32-bit length prefix or exceeds the configured limit.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: u64, max: u64 },

    /// MsgPack serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    /// Payload envelope could not be unpacked into a message kind.
    #[error("unpack error: {0}")]
    Unpack(String),

    /// Message name has no registered kind.
    #[error("no message kind registered for {0:?}")]
    UnknownMessage(String),

    /// Message kind is 0 or already taken.
    #[error("invalid message kind {kind} for {name:?}")]
    InvalidKind { name: String, kind: MessageKind },

    /// Router has no handler for the given kind.
    #[error("handler not found for message kind: {0}")]
    HandlerNotFound(MessageKind),

    /// Bounded outbound queue is full (non-blocking send only).
    #[error("outbound queue full")]
    QueueFull,

    /// Operation attempted after the connection started stopping.
    #[error("connection closed")]
    ConnectionClosed,

    /// `start` called on a connection that is not in the `Created` state.
    #[error("connection already started")]
    AlreadyStarted,
}

impl WireError {
    /// Map a short read into `StreamClosed`, keeping other I/O errors intact.
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            WireError::StreamClosed
        } else {
            WireError::Io(err)
        }
    }

    /// True when the error means the transport is gone for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WireError::Io(_) | WireError::StreamClosed | WireError::ConnectionClosed
        )
    }
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_unexpected_eof_maps_to_stream_closed() {
        let err = WireError::from_read(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(matches!(err, WireError::StreamClosed));
    }

    #[test]
    fn test_other_read_errors_stay_io() {
        let err = WireError::from_read(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(matches!(err, WireError::Io(_)));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_frame_too_large_message() {
        let err = WireError::FrameTooLarge { size: 10, max: 4 };
        assert_eq!(err.to_string(), "frame too large: 10 bytes exceeds maximum 4");
        assert!(!err.is_terminal());
    }
}
