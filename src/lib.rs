//! # wirelink
//!
//! Length-prefixed message connections over any tokio byte stream.
//!
//! A [`Connection`] turns an accepted stream into discrete application
//! messages and back. Each started connection runs three tasks:
//!
//! - **Read pump**: decodes frames, unpacks the message kind, queues them
//! - **Write pump**: writes queued frames in submission order
//! - **Dispatch loop**: hands each decoded message to a [`Router`]
//!
//! ## Wire format
//!
//! ```text
//! ┌──────────────────────┬─────────────────────────┐
//! │ length (u32, BE)     │ payload (length bytes)  │
//! └──────────────────────┴─────────────────────────┘
//! ```
//!
//! Frames follow each other with no separators. A zero-length frame is a
//! keep-alive and is never dispatched.
//!
//! ## Example
//!
//! ```ignore
//! use wirelink::{Connection, HandlerRegistry, KindPrefixCodec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:7000").await?;
//!
//!     loop {
//!         let (stream, _) = listener.accept().await?;
//!         let mut router = HandlerRegistry::new();
//!         router.register(1, |text: String, conn| async move {
//!             tracing::info!("{}: {}", conn.id(), text);
//!             Ok(())
//!         });
//!
//!         Connection::new(stream, KindPrefixCodec).start(router)?;
//!     }
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod router;
pub mod transport;

mod reader;
mod writer;

pub use codec::{
    Codec, Envelope, KindPrefixCodec, KindRegistry, Message, MessageKind, MsgPackCodec,
    MsgPackEnvelopeCodec,
};
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionBuilder, ConnectionId};
pub use error::{Result, WireError};
pub use lifecycle::{ConnectionState, StopReason};
pub use router::{HandlerRegistry, Router};
pub use transport::Transport;
