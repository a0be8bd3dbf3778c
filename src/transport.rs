//! Byte-stream transports a connection can run over.

use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional, ordered byte stream.
///
/// Implemented for anything tokio can read and write: `TcpStream`,
/// `UnixStream`, `DuplexStream`, TLS streams and so on. The connection
/// splits it into independent read and write halves.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
