//! Write pump - the single consumer of the outbound queue.
//!
//! Producers hold a cloneable [`WriterHandle`]; the pump owns the write half
//! of the transport and writes frames strictly in the order they were
//! queued.
//!
//! ```text
//! send()     ─┐
//! send_raw() ─┼─► mpsc::Sender<Bytes> ─► Write Pump ─► Transport
//! handler N  ─┘
//! ```
//!
//! Frames that are already waiting when the pump wakes up are written
//! together with one vectored write, which keeps order and saves syscalls.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{Result, WireError};
use crate::lifecycle::{Activity, StopSignal};

/// Default outbound queue capacity (frames).
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Upper bound on writing queued frames after stop. A peer that stopped
/// reading must not keep the connection out of `Closed`.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle for queueing framed buffers to the write pump.
///
/// Cheap to clone; every clone feeds the same ordered queue.
#[derive(Clone, Debug)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Create the handle and the receiving end the pump will own.
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
        };
        (handle, rx)
    }

    /// Queue a frame, waiting for room in the queue.
    ///
    /// Cancel-safe: a slot is reserved first, so a dropped call queues nothing.
    pub(crate) async fn send(&self, frame: Bytes) -> Result<()> {
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| WireError::ConnectionClosed)?;
        self.pending.fetch_add(1, Ordering::AcqRel);
        permit.send(frame);
        Ok(())
    }

    /// Queue a frame without waiting.
    pub(crate) fn try_send(&self, frame: Bytes) -> Result<()> {
        let permit = self.tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => WireError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => WireError::ConnectionClosed,
        })?;
        self.pending.fetch_add(1, Ordering::AcqRel);
        permit.send(frame);
        Ok(())
    }

    /// Frames queued but not yet written.
    #[inline]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn pending_counter(&self) -> Arc<AtomicUsize> {
        self.pending.clone()
    }
}

/// Write pump loop.
///
/// Returns `Ok(())` when stopped, `Err` on the first failed write. On stop,
/// with `drain` set, the batch in flight is finished and frames already in
/// the queue are written, all within `DRAIN_TIMEOUT` of the stop. Without
/// `drain` the in-flight batch and the queue are dropped. Dropped frames
/// are taken off the pending count.
pub(crate) async fn write_pump<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    mut stop: StopSignal,
    activity: Arc<Activity>,
    drain: bool,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    let mut deadline = None;

    loop {
        let first = tokio::select! {
            biased;
            _ = stop.stopped() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        batch.push(first);
        collect_ready(&mut rx, &mut batch);

        let written = {
            let write = write_batch(&mut writer, &batch);
            tokio::pin!(write);
            tokio::select! {
                result = &mut write => Some(result),
                _ = stop.stopped() => {
                    if drain {
                        let until = Instant::now() + DRAIN_TIMEOUT;
                        deadline = Some(until);
                        tokio::time::timeout_at(until, &mut write).await.ok()
                    } else {
                        None
                    }
                }
            }
        };

        match written {
            Some(Ok(())) => {
                pending.fetch_sub(batch.len(), Ordering::AcqRel);
                batch.clear();
                activity.touch();
            }
            Some(Err(e)) => {
                abandon(&mut rx, &mut batch, &pending);
                return Err(e);
            }
            None => {
                let dropped = abandon(&mut rx, &mut batch, &pending);
                tracing::warn!("abandoned in-flight write, dropping {} frames", dropped);
                return Ok(());
            }
        }

        if deadline.is_some() {
            break;
        }
    }

    rx.close();
    if drain {
        let until = deadline.unwrap_or_else(|| Instant::now() + DRAIN_TIMEOUT);
        let drained = tokio::time::timeout_at(until, async {
            loop {
                collect_ready(&mut rx, &mut batch);
                if batch.is_empty() {
                    return Ok::<(), WireError>(());
                }
                write_batch(&mut writer, &batch).await?;
                pending.fetch_sub(batch.len(), Ordering::AcqRel);
                batch.clear();
            }
        })
        .await;

        match drained {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                abandon(&mut rx, &mut batch, &pending);
                return Err(e);
            }
            Err(_) => {
                let dropped = abandon(&mut rx, &mut batch, &pending);
                tracing::warn!("drain timed out, dropping {} queued frames", dropped);
                return Ok(());
            }
        }
    } else {
        let dropped = discard_queued(&mut rx, &pending);
        if dropped > 0 {
            tracing::debug!("discarding {} queued frames", dropped);
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!("write half shutdown failed: {}", e);
    }
    Ok(())
}

/// Close the queue and drop everything left in it, returning the count.
pub(crate) fn discard_queued(rx: &mut mpsc::Receiver<Bytes>, pending: &AtomicUsize) -> usize {
    rx.close();
    let mut dropped = 0;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    pending.fetch_sub(dropped, Ordering::AcqRel);
    dropped
}

/// Drop the unwritten batch and the rest of the queue.
fn abandon(rx: &mut mpsc::Receiver<Bytes>, batch: &mut Vec<Bytes>, pending: &AtomicUsize) -> usize {
    let unwritten = batch.len();
    batch.clear();
    pending.fetch_sub(unwritten, Ordering::AcqRel);
    unwritten + discard_queued(rx, pending)
}

/// Move frames that are already queued into the batch (non-blocking).
fn collect_ready(rx: &mut mpsc::Receiver<Bytes>, batch: &mut Vec<Bytes>) {
    while batch.len() < MAX_BATCH_SIZE {
        match rx.try_recv() {
            Ok(frame) => batch.push(frame),
            Err(_) => break,
        }
    }
}

/// Write a batch of frames with scatter/gather I/O (write_vectored).
///
/// A partial vectored write is continued from where it stopped; a write
/// returning 0 is a `WriteZero` error.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    if total_size == 0 {
        return Ok(());
    }

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after skipping `skip_bytes`.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.len();
        if skip_bytes < end && !frame.is_empty() {
            let start_in_frame = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame[start_in_frame..]));
        }
        offset = end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{Lifecycle, StopReason};
    use crate::protocol::{encode_frame, FrameDecoder};
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    fn frame(payload: &[u8]) -> Bytes {
        encode_frame(payload).unwrap()
    }

    fn spawn_pump<W>(
        writer: W,
        drain: bool,
    ) -> (
        WriterHandle,
        Arc<Lifecycle>,
        tokio::task::JoinHandle<Result<()>>,
    )
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.mark_running();
        let (handle, rx) = WriterHandle::channel(16);
        let task = tokio::spawn(write_pump(
            rx,
            writer,
            handle.pending_counter(),
            lifecycle.stop_signal(),
            Arc::new(Activity::new()),
            drain,
        ));
        (handle, lifecycle, task)
    }

    /// Writer accepting at most `chunk` bytes per call.
    struct Trickle {
        out: Vec<u8>,
        chunk: usize,
    }

    impl AsyncWrite for Trickle {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Writer that always fails.
    struct Broken;

    impl AsyncWrite for Broken {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![frame(b"hello"), frame(b"ab")];
        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 9);
        assert_eq!(slices[1].len(), 6);
    }

    #[test]
    fn test_build_remaining_slices_mid_first_frame() {
        let batch = vec![frame(b"hello"), frame(b"ab")];
        let slices = build_remaining_slices(&batch, 3);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 6);
        assert_eq!(slices[1].len(), 6);
    }

    #[test]
    fn test_build_remaining_slices_skip_whole_frame() {
        let batch = vec![frame(b"hello"), frame(b"ab")];
        let slices = build_remaining_slices(&batch, 9);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], &frame(b"ab")[..]);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5u8).map(|i| frame(&[i; 3])).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        let written = buf.into_inner();
        assert_eq!(written.len(), 5 * 7);
        let frames = FrameDecoder::new().push(&written).unwrap();
        assert_eq!(frames.len(), 5);
        assert_eq!(&frames[4][..], &[4, 4, 4]);
    }

    #[tokio::test]
    async fn test_write_batch_partial_writes_complete() {
        let mut out = Trickle {
            out: Vec::new(),
            chunk: 3,
        };
        let batch = vec![frame(b"partial"), frame(b"writes")];

        write_batch(&mut out, &batch).await.unwrap();

        let mut expected = frame(b"partial").to_vec();
        expected.extend_from_slice(&frame(b"writes"));
        assert_eq!(out.out, expected);
    }

    #[tokio::test]
    async fn test_pump_preserves_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, _lifecycle, _task) = spawn_pump(client, true);

        for i in 0..100u32 {
            handle.send(frame(&i.to_be_bytes())).await.unwrap();
        }

        let mut decoder = FrameDecoder::new();
        let mut seen = Vec::new();
        let mut buf = vec![0u8; 4096];
        while seen.len() < 100 {
            let n = server.read(&mut buf).await.unwrap();
            seen.extend(decoder.push(&buf[..n]).unwrap());
        }

        for (i, payload) in seen.iter().enumerate() {
            assert_eq!(&payload[..], &(i as u32).to_be_bytes());
        }
    }

    #[tokio::test]
    async fn test_pending_count_returns_to_zero() {
        let (client, mut server) = duplex(4096);
        let (handle, _lifecycle, _task) = spawn_pump(client, true);

        handle.send(frame(b"one")).await.unwrap();
        handle.send(frame(b"two")).await.unwrap();

        let mut buf = [0u8; 14];
        server.read_exact(&mut buf).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while handle.pending_count() != 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("pending count never drained");
    }

    #[tokio::test]
    async fn test_stop_drains_queued_frames() {
        let (client, mut server) = duplex(4096);
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.mark_running();
        let (handle, rx) = WriterHandle::channel(16);
        handle.send(frame(b"a")).await.unwrap();
        handle.send(frame(b"b")).await.unwrap();
        lifecycle.begin_stop(StopReason::Requested);

        write_pump(
            rx,
            client,
            handle.pending_counter(),
            lifecycle.stop_signal(),
            Arc::new(Activity::new()),
            true,
        )
        .await
        .unwrap();

        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        let frames = FrameDecoder::new().push(&out).unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(handle.pending_count(), 0);
        assert!(handle.send(frame(b"late")).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_without_drain_discards_queue() {
        let (client, mut server) = duplex(4096);
        let lifecycle = Arc::new(Lifecycle::new());
        let (handle, rx) = WriterHandle::channel(16);
        handle.send(frame(b"dropped")).await.unwrap();
        lifecycle.begin_stop(StopReason::Requested);

        write_pump(
            rx,
            client,
            handle.pending_counter(),
            lifecycle.stop_signal(),
            Arc::new(Activity::new()),
            false,
        )
        .await
        .unwrap();

        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_mid_write_finishes_batch_then_drains() {
        // The 8-byte pipe blocks the 24-byte frame until the peer reads.
        let (client, mut server) = duplex(8);
        let (handle, lifecycle, task) = spawn_pump(client, true);

        handle.send(frame(&[b'a'; 20])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.send(frame(b"b")).await.unwrap();
        lifecycle.begin_stop(StopReason::Requested);

        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        let frames = FrameDecoder::new().push(&out).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &[b'a'; 20]);
        assert_eq!(&frames[1][..], b"b");

        assert!(task.await.unwrap().is_ok());
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_mid_write_without_drain_drops_batch() {
        let (client, _server) = duplex(8);
        let (handle, lifecycle, task) = spawn_pump(client, false);

        handle.send(frame(&[b'a'; 20])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.send(frame(b"b")).await.unwrap();
        lifecycle.begin_stop(StopReason::Requested);

        assert!(task.await.unwrap().is_ok());
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_on_stalled_peer() {
        // 8-byte pipe that nobody reads.
        let (client, _server) = duplex(8);
        let lifecycle = Arc::new(Lifecycle::new());
        let (handle, rx) = WriterHandle::channel(16);
        handle.send(frame(b"does not fit")).await.unwrap();
        lifecycle.begin_stop(StopReason::Requested);

        let result = write_pump(
            rx,
            client,
            handle.pending_counter(),
            lifecycle.stop_signal(),
            Arc::new(Activity::new()),
            true,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_ends_pump() {
        let (handle, _lifecycle, task) = spawn_pump(Broken, true);
        handle.send(frame(b"x")).await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(WireError::Io(_))));
        assert!(handle.send(frame(b"y")).await.is_err());
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_try_send_full_queue() {
        let (handle, _rx) = WriterHandle::channel(1);
        handle.try_send(frame(b"1")).unwrap();

        let result = handle.try_send(frame(b"2"));
        assert!(matches!(result, Err(WireError::QueueFull)));
        assert_eq!(handle.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_try_send_closed_queue() {
        let (handle, rx) = WriterHandle::channel(1);
        drop(rx);

        let result = handle.try_send(frame(b"1"));
        assert!(matches!(result, Err(WireError::ConnectionClosed)));
        assert_eq!(handle.pending_count(), 0);
    }
}
