//! Handler registry for dispatching messages by kind.
//!
//! # Example
//!
//! ```ignore
//! use wirelink::router::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new();
//!
//! // Body decoded from MsgPack before the handler runs
//! registry.register(1, |text: String, conn| async move {
//!     tracing::info!("{} says {}", conn.id(), text);
//!     Ok(())
//! });
//!
//! // Raw envelope, no decoding
//! registry.register_raw(2, |conn, envelope| async move {
//!     conn.send_raw(wirelink::protocol::encode_frame(&envelope.payload)?).await
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use super::{BoxFuture, HandlerResult, Router};
use crate::codec::{Envelope, KindRegistry, Message, MessageKind, MsgPackCodec};
use crate::connection::Connection;
use crate::error::{Result, WireError};

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle one message.
    fn call(&self, conn: Connection, envelope: Envelope) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that deserializes the envelope body before calling the handler.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(T, Connection) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, Connection) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(T, Connection) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, conn: Connection, envelope: Envelope) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match MsgPackCodec::decode(&envelope.body) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        Box::pin((self.handler)(parsed, conn))
    }
}

/// Handler receiving the envelope as-is.
pub struct RawHandler<F> {
    handler: F,
}

impl<F, Fut> RawHandler<F>
where
    F: Fn(Connection, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new raw handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Handler for RawHandler<F>
where
    F: Fn(Connection, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, conn: Connection, envelope: Envelope) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(conn, envelope))
    }
}

/// Registry mapping message kinds to handlers.
///
/// Registering a kind twice replaces the earlier handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageKind, Box<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler for `kind`.
    ///
    /// The handler takes the MsgPack-decoded body and the connection.
    pub fn register<F, T, Fut>(&mut self, kind: MessageKind, handler: F) -> &mut Self
    where
        F: Fn(T, Connection) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers
            .insert(kind, Box::new(TypedHandler::new(handler)));
        self
    }

    /// Register a handler that receives the raw envelope.
    pub fn register_raw<F, Fut>(&mut self, kind: MessageKind, handler: F) -> &mut Self
    where
        F: Fn(Connection, Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.insert(kind, Box::new(RawHandler::new(handler)));
        self
    }

    /// Register a typed handler for message type `M`, looking its kind up in `kinds`.
    ///
    /// # Errors
    ///
    /// `UnknownMessage` if `M::NAME` is not registered.
    pub fn on<M, F, Fut>(&mut self, kinds: &KindRegistry, handler: F) -> Result<&mut Self>
    where
        M: Message + DeserializeOwned + Send + 'static,
        F: Fn(M, Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let kind = kinds.kind_for::<M>()?;
        Ok(self.register(kind, handler))
    }

    /// Get a handler by kind.
    pub fn get_handler(&self, kind: MessageKind) -> Option<&dyn Handler> {
        self.handlers.get(&kind).map(|h| h.as_ref())
    }

    /// True if a handler is registered for `kind`.
    pub fn contains(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Router for HandlerRegistry {
    fn dispatch(&self, conn: &Connection, envelope: Envelope) -> BoxFuture<'static, HandlerResult> {
        match self.get_handler(envelope.kind) {
            Some(handler) => handler.call(conn.clone(), envelope),
            None => {
                let kind = envelope.kind;
                Box::pin(async move { Err(WireError::HandlerNotFound(kind)) })
            }
        }
    }
}
