//! Blocking frame reads from an async stream.
//!
//! These are the read half of the framer: each call suspends until exactly
//! the requested number of bytes arrived, or fails. A short buffer is never
//! returned.
//!
//! # Example
//!
//! ```
//! use wirelink::protocol::{encode_frame, read_header, read_payload};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let wire = encode_frame(b"hello").unwrap();
//! let mut stream = &wire[..];
//!
//! let len = read_header(&mut stream).await.unwrap();
//! let payload = read_payload(&mut stream, len).await.unwrap();
//! assert_eq!(&payload[..], b"hello");
//! # });
//! ```

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::wire_format::{check_length, LENGTH_PREFIX_SIZE};
use crate::error::{Result, WireError};

/// Read exactly one 4-byte length prefix.
///
/// Fails with `StreamClosed` if the stream ends first, `Io` on any other
/// transport error.
pub async fn read_header<R>(reader: &mut R) -> Result<u32>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader
        .read_exact(&mut prefix)
        .await
        .map_err(WireError::from_read)?;
    Ok(u32::from_be_bytes(prefix))
}

/// Read exactly `len` payload bytes.
pub async fn read_payload<R>(reader: &mut R, len: u32) -> Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if len == 0 {
        return Ok(Bytes::new());
    }

    let mut buf = BytesMut::zeroed(len as usize);
    reader
        .read_exact(&mut buf)
        .await
        .map_err(WireError::from_read)?;
    Ok(buf.freeze())
}

/// Read one complete frame, rejecting declared lengths above `max_payload`
/// before allocating for them.
pub async fn read_frame<R>(reader: &mut R, max_payload: u32) -> Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = read_header(reader).await?;
    check_length(len, max_payload)?;
    read_payload(reader, len).await
}
