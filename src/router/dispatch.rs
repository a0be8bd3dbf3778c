//! Dispatch loop - drains the inbound queue into the router.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::Router;
use crate::codec::Envelope;
use crate::connection::Connection;
use crate::lifecycle::StopSignal;

/// Forward inbound envelopes to `router`, one at a time, in queue order.
///
/// Exits when the connection stops or the read pump drops the queue. A
/// handler still running when stop arrives is dropped, so a handler may
/// call `close()` on its own connection.
pub(crate) async fn dispatch_loop(
    conn: Connection,
    router: Arc<dyn Router>,
    mut inbound: mpsc::Receiver<Envelope>,
    mut stop: StopSignal,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = stop.stopped() => break,
            next = inbound.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        if !envelope.is_routable() {
            tracing::trace!(connection = %conn.id(), "skipping reserved kind");
            continue;
        }

        let kind = envelope.kind;
        tokio::select! {
            biased;
            _ = stop.stopped() => break,
            result = router.dispatch(&conn, envelope) => {
                if let Err(e) = result {
                    tracing::error!(connection = %conn.id(), kind, "handler error: {}", e);
                }
            }
        }
    }

    tracing::debug!(connection = %conn.id(), "dispatch loop exited");
}
