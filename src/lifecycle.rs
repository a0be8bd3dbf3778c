//! Connection lifecycle state and the broadcast stop signal.
//!
//! ```text
//! ┌─────────┐ start ┌─────────┐ failure/close ┌──────────┐ pumps exited ┌────────┐
//! │ Created │──────>│ Running │──────────────>│ Stopping │─────────────>│ Closed │
//! └─────────┘       └─────────┘               └──────────┘              └────────┘
//!      │                                                                     ↑
//!      └──────────────────────── close (never started) ─────────────────────┘
//! ```
//!
//! The state lives in a `tokio::sync::watch` channel so every pump can wait
//! on the transition to `Stopping` while it is blocked elsewhere.

use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Connection lifecycle state. Ordered: a connection only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// Constructed, pumps not started.
    Created,
    /// Read pump, write pump and dispatch loop are running.
    Running,
    /// A pump failed or close was requested; activities are winding down.
    Stopping,
    /// Transport released and all activities exited (terminal).
    Closed,
}

impl ConnectionState {
    /// True once the connection no longer accepts work.
    #[inline]
    pub fn is_stopping_or_closed(self) -> bool {
        self >= ConnectionState::Stopping
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Created => "created",
            ConnectionState::Running => "running",
            ConnectionState::Stopping => "stopping",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a connection left the `Running` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `close()` was called.
    Requested,
    /// The peer closed the stream, possibly mid-frame.
    PeerClosed,
    /// The read pump failed (short read, transport error, oversized frame).
    ReadFailed(String),
    /// The write pump failed to write a frame.
    WriteFailed(String),
    /// An activity ended without reporting (panicked or was cancelled).
    Aborted(&'static str),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => f.write_str("close requested"),
            StopReason::PeerClosed => f.write_str("peer closed"),
            StopReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            StopReason::WriteFailed(e) => write!(f, "write failed: {e}"),
            StopReason::Aborted(task) => write!(f, "{task} task aborted"),
        }
    }
}

/// Shared lifecycle: current state plus the first stop reason.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: watch::Sender<ConnectionState>,
    reason: Mutex<Option<StopReason>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Created);
        Self {
            state,
            reason: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn reason(&self) -> Option<StopReason> {
        self.reason.lock().clone()
    }

    /// Move `Created -> Running`. Returns false from any other state.
    pub(crate) fn mark_running(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Created {
                *state = ConnectionState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Enter `Stopping` and broadcast it. Only the first caller records its
    /// reason; returns whether this call did the transition.
    pub(crate) fn begin_stop(&self, reason: StopReason) -> bool {
        let mut recorded = self.reason.lock();
        let moved = self.state.send_if_modified(|state| {
            if *state < ConnectionState::Stopping {
                *state = ConnectionState::Stopping;
                true
            } else {
                false
            }
        });
        if moved {
            *recorded = Some(reason);
        }
        moved
    }

    /// Enter the terminal `Closed` state.
    pub(crate) fn mark_closed(&self) {
        self.state.send_if_modified(|state| {
            if *state != ConnectionState::Closed {
                *state = ConnectionState::Closed;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn stop_signal(&self) -> StopSignal {
        StopSignal {
            rx: self.state.subscribe(),
        }
    }

    /// Wait until the connection reaches `Closed`.
    pub(crate) async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }
}

/// Receiver side of the broadcast-once stop signal.
#[derive(Debug, Clone)]
pub(crate) struct StopSignal {
    rx: watch::Receiver<ConnectionState>,
}

impl StopSignal {
    /// Resolve once the connection is `Stopping` or `Closed`.
    ///
    /// Cancel-safe: the current state is checked first, so a signal sent
    /// before the call is never missed.
    pub(crate) async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|state| state.is_stopping_or_closed()).await;
    }

    #[cfg(test)]
    pub(crate) fn is_stopped(&self) -> bool {
        self.rx.borrow().is_stopping_or_closed()
    }
}

/// Monotonic last-activity timestamp. Last write wins.
#[derive(Debug)]
pub(crate) struct Activity {
    last: Mutex<Instant>,
}

impl Activity {
    pub(crate) fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub(crate) fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    #[inline]
    pub(crate) fn last(&self) -> Instant {
        *self.last.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_states_are_ordered() {
        assert!(ConnectionState::Created < ConnectionState::Running);
        assert!(ConnectionState::Running < ConnectionState::Stopping);
        assert!(ConnectionState::Stopping < ConnectionState::Closed);
        assert!(!ConnectionState::Running.is_stopping_or_closed());
        assert!(ConnectionState::Closed.is_stopping_or_closed());
    }

    #[test]
    fn test_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ConnectionState::Created);

        assert!(lifecycle.mark_running());
        assert!(!lifecycle.mark_running());
        assert_eq!(lifecycle.state(), ConnectionState::Running);

        assert!(lifecycle.begin_stop(StopReason::PeerClosed));
        assert_eq!(lifecycle.state(), ConnectionState::Stopping);

        lifecycle.mark_closed();
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
        assert!(!lifecycle.mark_running());
    }

    #[test]
    fn test_first_stop_reason_wins() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_running();

        assert!(lifecycle.begin_stop(StopReason::WriteFailed("broken pipe".into())));
        assert!(!lifecycle.begin_stop(StopReason::Requested));

        assert_eq!(
            lifecycle.reason(),
            Some(StopReason::WriteFailed("broken pipe".into()))
        );
    }

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(StopReason::PeerClosed.to_string(), "peer closed");
        assert_eq!(
            StopReason::ReadFailed("stream closed".into()).to_string(),
            "read failed: stream closed"
        );
        assert_eq!(StopReason::Aborted("dispatch").to_string(), "dispatch task aborted");
    }

    #[test]
    fn test_begin_stop_after_closed_is_noop() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_closed();

        assert!(!lifecycle.begin_stop(StopReason::Requested));
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
        assert_eq!(lifecycle.reason(), None);
    }

    #[tokio::test]
    async fn test_stop_signal_wakes_waiters() {
        let lifecycle = std::sync::Arc::new(Lifecycle::new());
        lifecycle.mark_running();

        let mut signal = lifecycle.stop_signal();
        assert!(!signal.is_stopped());

        let waiter = tokio::spawn(async move {
            signal.stopped().await;
        });

        tokio::task::yield_now().await;
        lifecycle.begin_stop(StopReason::Requested);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("stop signal not observed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_signal_sent_before_wait_is_seen() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_stop(StopReason::Requested);

        let mut signal = lifecycle.stop_signal();
        tokio::time::timeout(Duration::from_secs(1), signal.stopped())
            .await
            .expect("missed earlier stop");
    }

    #[test]
    fn test_activity_touch_moves_forward() {
        let activity = Activity::new();
        let before = activity.last();
        std::thread::sleep(Duration::from_millis(2));
        activity.touch();
        assert!(activity.last() > before);
    }
}
