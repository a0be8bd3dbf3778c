//! Read pump - turns the byte stream into envelopes on the inbound queue.
//!
//! Each iteration reads one frame. Zero-length frames are keep-alives: they
//! refresh activity and are skipped. A payload the codec cannot unpack is
//! logged and dropped; the framing itself is still intact, so reading goes
//! on. Any framing or transport failure ends the pump.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use crate::codec::{Codec, Envelope};
use crate::connection::ConnectionId;
use crate::error::Result;
use crate::lifecycle::{Activity, StopSignal};
use crate::protocol::read_frame;

/// Default inbound queue capacity (decoded messages).
pub const DEFAULT_INBOUND_CAPACITY: usize = 1024;

/// Everything the read pump needs besides the reader.
pub(crate) struct ReadPump {
    pub(crate) id: ConnectionId,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) inbound: mpsc::Sender<Envelope>,
    pub(crate) stop: StopSignal,
    pub(crate) activity: Arc<Activity>,
    pub(crate) max_payload_size: u32,
}

impl ReadPump {
    /// Run until stopped (`Ok`) or the stream fails (`Err`).
    ///
    /// `Err(StreamClosed)` means the peer went away, possibly mid-frame;
    /// partial frames are never enqueued.
    pub(crate) async fn run<R>(self, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let ReadPump {
            id,
            codec,
            inbound,
            mut stop,
            activity,
            max_payload_size,
        } = self;

        loop {
            let payload = tokio::select! {
                biased;
                _ = stop.stopped() => return Ok(()),
                payload = read_frame(&mut reader, max_payload_size) => payload?,
            };
            activity.touch();

            if payload.is_empty() {
                tracing::trace!(connection = %id, "keep-alive frame");
                continue;
            }

            let envelope = match codec.unpack(&payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(
                        connection = %id,
                        len = payload.len(),
                        "dropping payload that failed to unpack: {}",
                        e
                    );
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = stop.stopped() => return Ok(()),
                sent = inbound.send(envelope) => {
                    if sent.is_err() {
                        // Dispatch loop is gone; it only exits on stop.
                        return Ok(());
                    }
                }
            }
        }
    }
}
