//! Router module - the bridge from decoded messages to application code.
//!
//! The dispatch loop hands every routable envelope (kind != 0) to a single
//! [`Router`] entry point, one at a time, in arrival order. Router failures
//! are logged and never affect the connection.
//!
//! Provides:
//! - [`Router`] - the entry point trait (implemented for closures)
//! - [`HandlerRegistry`] - maps message kinds to typed handlers
//!
//! # Example
//!
//! ```ignore
//! use wirelink::router::HandlerRegistry;
//!
//! let mut router = HandlerRegistry::new();
//! router.register(1, |name: String, conn| async move {
//!     conn.send(&Greeting { text: format!("hello {name}") }).await
//! });
//!
//! connection.start(router)?;
//! ```

mod dispatch;
mod registry;

use std::future::Future;
use std::pin::Pin;

use crate::codec::Envelope;
use crate::connection::Connection;
use crate::error::Result;

pub(crate) use dispatch::dispatch_loop;
pub use registry::{Handler, HandlerRegistry, RawHandler, TypedHandler};

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// External entry point receiving every decoded message.
pub trait Router: Send + Sync + 'static {
    /// Handle one message from `conn`.
    ///
    /// `envelope.payload` is the exact payload read from the wire.
    fn dispatch(&self, conn: &Connection, envelope: Envelope) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Router for F
where
    F: Fn(Connection, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn dispatch(&self, conn: &Connection, envelope: Envelope) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(conn.clone(), envelope))
    }
}
