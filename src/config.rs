//! Connection tuning knobs.
//!
//! `ConnectionConfig` is plain serde data so hosts can embed it in their
//! own configuration files. Missing fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
pub use crate::reader::DEFAULT_INBOUND_CAPACITY;
pub use crate::writer::DEFAULT_OUTBOUND_CAPACITY;

/// Per-connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Largest accepted inbound payload, in bytes. Larger frames stop the
    /// connection before any allocation.
    pub max_payload_size: u32,
    /// Decoded messages buffered between the read pump and the dispatch loop.
    pub inbound_capacity: usize,
    /// Encoded frames buffered between senders and the write pump.
    pub outbound_capacity: usize,
    /// Write already-queued frames before releasing the write half on stop.
    pub drain_on_close: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            drain_on_close: true,
        }
    }
}

impl ConnectionConfig {
    /// Clamp capacities to at least one slot (tokio channels reject zero).
    pub(crate) fn normalized(mut self) -> Self {
        self.inbound_capacity = self.inbound_capacity.max(1);
        self.outbound_capacity = self.outbound_capacity.max(1);
        self
    }
}
