//! Connection - one live peer session over a framed byte stream.
//!
//! A [`Connection`] owns the transport and runs three tasks once started:
//!
//! ```text
//!            ┌───────────┐  inbound   ┌──────────┐
//! stream ───►│ Read Pump │───mpsc────►│ Dispatch │───► Router
//!            └───────────┘            └──────────┘
//!            ┌────────────┐ outbound
//! stream ◄───│ Write Pump │◄──mpsc─── send() / send_raw()
//!            └────────────┘
//! ```
//!
//! The tasks share nothing but the two queues and the lifecycle signal. The
//! first task to fail (or `close()`) moves the connection to `Stopping`;
//! every task observes that, exits, and a supervisor marks it `Closed`.
//!
//! # Example
//!
//! ```ignore
//! use wirelink::{Connection, KindPrefixCodec};
//!
//! let (stream, _) = listener.accept().await?;
//! let conn = Connection::new(stream, KindPrefixCodec);
//! conn.start(|conn: Connection, envelope| async move {
//!     tracing::info!("{} sent kind {}", conn.id(), envelope.kind);
//!     Ok(())
//! })?;
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::codec::{Codec, KindPrefixCodec, KindRegistry, Message, MsgPackCodec};
use crate::config::ConnectionConfig;
use crate::error::{Result, WireError};
use crate::lifecycle::{Activity, ConnectionState, Lifecycle, StopReason};
use crate::protocol::encode_frame;
use crate::reader::ReadPump;
use crate::router::{dispatch_loop, Router};
use crate::transport::Transport;
use crate::writer::{discard_queued, write_pump, WriterHandle};

/// Unique connection identity, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

type UserState = Arc<dyn Any + Send + Sync>;

/// Transport halves and the outbound receiver, held until `start()`.
struct Parts {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    outbound: mpsc::Receiver<Bytes>,
}

struct Inner {
    id: ConnectionId,
    codec: Arc<dyn Codec>,
    kinds: Arc<KindRegistry>,
    config: ConnectionConfig,
    lifecycle: Arc<Lifecycle>,
    activity: Arc<Activity>,
    writer: WriterHandle,
    parts: Mutex<Option<Parts>>,
    user_state: RwLock<Option<UserState>>,
}

/// Handle to a framed connection.
///
/// Cheap to clone; all clones refer to the same session. Dropping every
/// handle does not stop a started connection, which runs until the peer
/// goes away or `close()` is called.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("pending_outbound", &self.pending_outbound())
            .finish()
    }
}

impl Connection {
    /// Wrap an accepted stream with default settings and an empty kind registry.
    pub fn new<T, C>(stream: T, codec: C) -> Self
    where
        T: Transport,
        C: Codec,
    {
        ConnectionBuilder::new().codec(codec).build(stream)
    }

    /// Create a builder for configuring a connection.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Connection identity.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.state()
    }

    /// Why the connection left `Running`, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.inner.lifecycle.reason()
    }

    /// Effective configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Kind registry used by [`send`](Self::send).
    pub fn kinds(&self) -> &KindRegistry {
        &self.inner.kinds
    }

    /// Time of the last completed read or write (or [`touch`](Self::touch)).
    pub fn last_activity(&self) -> Instant {
        self.inner.activity.last()
    }

    /// Mark the connection as active now.
    pub fn touch(&self) {
        self.inner.activity.touch();
    }

    /// Attach application state, replacing any previous value.
    pub fn set_user_state<T: Any + Send + Sync>(&self, state: Arc<T>) {
        *self.inner.user_state.write() = Some(state);
    }

    /// Attached state, if present and of type `T`.
    pub fn user_state<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let state = self.inner.user_state.read().clone()?;
        state.downcast::<T>().ok()
    }

    /// Detach and return the attached state, whatever its type.
    pub fn take_user_state(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.user_state.write().take()
    }

    /// Frames queued but not yet written.
    pub fn pending_outbound(&self) -> usize {
        self.inner.writer.pending_count()
    }

    /// Launch the read pump, write pump and dispatch loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` on a second call, `ConnectionClosed` if the
    /// connection was closed before it started.
    pub fn start<R: Router>(&self, router: R) -> Result<()> {
        self.start_shared(Arc::new(router))
    }

    /// Like [`start`](Self::start), for a router shared between connections.
    pub fn start_shared(&self, router: Arc<dyn Router>) -> Result<()> {
        let Some(parts) = self.inner.parts.lock().take() else {
            return Err(if self.state().is_stopping_or_closed() {
                WireError::ConnectionClosed
            } else {
                WireError::AlreadyStarted
            });
        };

        let Parts {
            reader,
            writer,
            outbound,
        } = parts;
        let inner = &self.inner;
        let id = inner.id;
        inner.lifecycle.mark_running();
        let (inbound_tx, inbound_rx) = mpsc::channel(inner.config.inbound_capacity);

        let pump = ReadPump {
            id,
            codec: inner.codec.clone(),
            inbound: inbound_tx,
            stop: inner.lifecycle.stop_signal(),
            activity: inner.activity.clone(),
            max_payload_size: inner.config.max_payload_size,
        };
        let read_task = tokio::spawn({
            let guard = StopGuard::new(inner.lifecycle.clone(), "read");
            let lifecycle = inner.lifecycle.clone();
            async move {
                let _guard = guard;
                match pump.run(reader).await {
                    Ok(()) => {}
                    Err(WireError::StreamClosed) => {
                        tracing::debug!(connection = %id, "peer closed stream");
                        lifecycle.begin_stop(StopReason::PeerClosed);
                    }
                    Err(e) => {
                        tracing::error!(connection = %id, "read pump failed: {}", e);
                        lifecycle.begin_stop(StopReason::ReadFailed(e.to_string()));
                    }
                }
            }
        });

        let write_task = tokio::spawn({
            let guard = StopGuard::new(inner.lifecycle.clone(), "write");
            let lifecycle = inner.lifecycle.clone();
            let pump = write_pump(
                outbound,
                writer,
                inner.writer.pending_counter(),
                inner.lifecycle.stop_signal(),
                inner.activity.clone(),
                inner.config.drain_on_close,
            );
            async move {
                let _guard = guard;
                if let Err(e) = pump.await {
                    tracing::error!(connection = %id, "write pump failed: {}", e);
                    lifecycle.begin_stop(StopReason::WriteFailed(e.to_string()));
                }
            }
        });

        let dispatch_task = tokio::spawn({
            let guard = StopGuard::new(inner.lifecycle.clone(), "dispatch");
            let dispatch = dispatch_loop(
                self.clone(),
                router,
                inbound_rx,
                inner.lifecycle.stop_signal(),
            );
            async move {
                let _guard = guard;
                dispatch.await;
            }
        });

        let lifecycle = inner.lifecycle.clone();
        tokio::spawn(async move {
            for (name, task) in [
                ("read", read_task),
                ("write", write_task),
                ("dispatch", dispatch_task),
            ] {
                if let Err(e) = task.await {
                    tracing::error!(connection = %id, "{} task failed: {}", name, e);
                }
            }
            lifecycle.mark_closed();
            match lifecycle.reason() {
                Some(reason) => tracing::debug!(connection = %id, %reason, "connection closed"),
                None => tracing::debug!(connection = %id, "connection closed"),
            }
        });

        tracing::debug!(connection = %id, "connection started");
        Ok(())
    }

    /// Serialize `message`, frame it and queue it for the write pump.
    ///
    /// Waits while the outbound queue is full.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` once the connection is stopping or closed
    /// - `UnknownMessage` if `M::NAME` has no registered kind
    /// - `Serialization` if the message cannot be encoded
    ///
    /// Nothing is queued when an error is returned.
    pub async fn send<M: Message>(&self, message: &M) -> Result<()> {
        let frame = self.encode(message)?;
        self.enqueue(frame).await
    }

    /// Queue an already-framed buffer as-is.
    ///
    /// The buffer is not validated; it must carry its own length prefix.
    pub async fn send_raw(&self, frame: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.enqueue(frame).await
    }

    /// Queue an already-framed buffer without waiting.
    ///
    /// # Errors
    ///
    /// `QueueFull` if the outbound queue has no free slot.
    pub fn try_send_raw(&self, frame: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.inner.writer.try_send(frame)
    }

    /// Stop the connection and wait until it is `Closed`.
    ///
    /// Idempotent. Safe to call from a handler running on this connection.
    pub async fn close(&self) {
        let unstarted = self.inner.parts.lock().take();
        if let Some(mut parts) = unstarted {
            discard_queued(&mut parts.outbound, &self.inner.writer.pending_counter());
            drop(parts);
            self.inner.lifecycle.begin_stop(StopReason::Requested);
            self.inner.lifecycle.mark_closed();
            tracing::debug!(connection = %self.inner.id, "closed before start");
            return;
        }

        if self.inner.lifecycle.begin_stop(StopReason::Requested) {
            tracing::debug!(connection = %self.inner.id, "close requested");
        }
        self.inner.lifecycle.closed().await;
    }

    /// Wait until the connection is `Closed` without requesting it.
    pub async fn closed(&self) {
        self.inner.lifecycle.closed().await;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state().is_stopping_or_closed() {
            return Err(WireError::ConnectionClosed);
        }
        Ok(())
    }

    fn encode<M: Message>(&self, message: &M) -> Result<Bytes> {
        self.ensure_open()?;
        let kind = self.inner.kinds.kind_for::<M>()?;
        let body = MsgPackCodec::encode(message).map_err(|e| {
            tracing::warn!(connection = %self.inner.id, message = M::NAME, "serialization failed: {}", e);
            e
        })?;
        let payload = self.inner.codec.pack(kind, &body)?;
        encode_frame(&payload)
    }

    async fn enqueue(&self, frame: Bytes) -> Result<()> {
        let mut stop = self.inner.lifecycle.stop_signal();
        tokio::select! {
            biased;
            _ = stop.stopped() => Err(WireError::ConnectionClosed),
            sent = self.inner.writer.send(frame) => sent,
        }
    }
}

/// Stops the connection if a task ends without reporting, e.g. on panic.
struct StopGuard {
    lifecycle: Arc<Lifecycle>,
    task: &'static str,
}

impl StopGuard {
    fn new(lifecycle: Arc<Lifecycle>, task: &'static str) -> Self {
        Self { lifecycle, task }
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if self.lifecycle.begin_stop(StopReason::Aborted(self.task)) {
            tracing::warn!("{} task ended unexpectedly", self.task);
        }
    }
}

/// Builder for configuring and creating a [`Connection`].
pub struct ConnectionBuilder {
    codec: Arc<dyn Codec>,
    kinds: Arc<KindRegistry>,
    id: Option<ConnectionId>,
    config: ConnectionConfig,
}

impl ConnectionBuilder {
    /// Create a builder with `KindPrefixCodec`, no registered kinds and
    /// default configuration.
    pub fn new() -> Self {
        Self {
            codec: Arc::new(KindPrefixCodec),
            kinds: Arc::new(KindRegistry::new()),
            id: None,
            config: ConnectionConfig::default(),
        }
    }

    /// Set the envelope codec.
    pub fn codec<C: Codec>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Set a codec shared with other connections.
    pub fn shared_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Set the message-name to kind lookup used by `send`.
    pub fn kinds(mut self, kinds: impl Into<Arc<KindRegistry>>) -> Self {
        self.kinds = kinds.into();
        self
    }

    /// Use a caller-supplied identity instead of a random one.
    pub fn id(mut self, id: ConnectionId) -> Self {
        self.id = Some(id);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the largest accepted inbound payload.
    ///
    /// Default: 1 GiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Set the inbound queue capacity.
    ///
    /// Default: 1024
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_capacity = capacity;
        self
    }

    /// Set the outbound queue capacity.
    ///
    /// Default: 1024
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    /// Write queued frames before shutting the stream down on stop.
    ///
    /// Default: true
    pub fn drain_on_close(mut self, drain: bool) -> Self {
        self.config.drain_on_close = drain;
        self
    }

    /// Take ownership of `stream` and create the connection in `Created`.
    pub fn build<T: Transport>(self, stream: T) -> Connection {
        let config = self.config.normalized();
        let (reader, writer) = tokio::io::split(stream);
        let (handle, outbound) = WriterHandle::channel(config.outbound_capacity);
        let id = self.id.unwrap_or_default();

        tracing::trace!(connection = %id, "connection created");

        Connection {
            inner: Arc::new(Inner {
                id,
                codec: self.codec,
                kinds: self.kinds,
                config,
                lifecycle: Arc::new(Lifecycle::new()),
                activity: Arc::new(Activity::new()),
                writer: handle,
                parts: Mutex::new(Some(Parts {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    outbound,
                })),
                user_state: RwLock::new(None),
            }),
        }
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
