//! Dedicated writer task for outbound frames.
//!
//! Every connection owns one writer task that receives encoded frames via an
//! mpsc channel. Handlers, callers and the read loop never touch the socket
//! write half directly, and ready frames are batched into single syscalls.
//!
//! # Architecture
//!
//! ```text
//! read loop ─┐
//! handlers  ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► TCP write half
//! callers   ─┘
//! ```
//!
//! # Backpressure
//!
//! The handle counts frames queued but not yet written. Once
//! `max_pending_frames` is reached, [`WriterHandle::send`] waits up to
//! `backpressure_timeout` before failing with `BackpressureTimeout`.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, TcpwireError};
use crate::protocol::{build_frame, Command};

/// Queued frames at which senders start waiting.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Slots in the channel between handles and the writer task.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// How long a sender waits for the queue to drain.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on frames coalesced into one vectored write.
const MAX_FRAMES_PER_WRITE: usize = 64;

/// Poll interval while waiting for backpressure to clear.
const BACKPRESSURE_POLL: Duration = Duration::from_micros(100);

/// A complete frame (envelope included) ready to be written.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    bytes: Bytes,
}

impl OutboundFrame {
    /// Wrap already encoded frame bytes.
    #[inline]
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// Encode a command into a frame.
    pub fn from_command(command: &Command) -> Result<Self> {
        Ok(Self::new(build_frame(command)?))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of this frame on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Queue limits of a connection's writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Frames queued but unwritten before senders start waiting.
    pub max_pending_frames: usize,
    /// Capacity of the mpsc channel feeding the task.
    pub channel_capacity: usize,
    /// How long a sender waits for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Cloneable sending side of a writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    /// Frames handed to the channel and not yet written.
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    /// Queue a frame for writing.
    ///
    /// # Errors
    ///
    /// `BackpressureTimeout` if the queue stays full past the configured
    /// timeout, `ConnectionClosed` if the writer task has stopped.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            tokio::time::timeout(self.timeout, self.drained())
                .await
                .map_err(|_| TcpwireError::BackpressureTimeout)?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            TcpwireError::ConnectionClosed
        })
    }

    async fn drained(&self) {
        while self.is_backpressure_active() {
            if self.tx.is_closed() {
                return;
            }
            tokio::time::sleep(BACKPRESSURE_POLL).await;
        }
    }

    /// True while the queue is at or above its limit.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the writer task has stopped receiving.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Start a writer task over `writer`.
///
/// The task ends cleanly once every handle is dropped, or with an error if
/// a write fails.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        max_pending: config.max_pending_frames,
        timeout: config.backpressure_timeout,
    };
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

/// Receive frames, batch whatever is ready and write it out.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_FRAMES_PER_WRITE);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < MAX_FRAMES_PER_WRITE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let count = batch.len();
        let result = write_batch(&mut writer, &batch).await;
        batch.clear();
        pending.fetch_sub(count, Ordering::Release);
        result?;
    }

    // Channel closed: every handle dropped
    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch of frames with vectored I/O, one slice per frame.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut written = 0;

    while written < total_size {
        let slices = build_remaining_slices(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(TcpwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "socket accepted no bytes",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// Slices covering everything after the first `skip_bytes` of the batch.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut frame_start = 0;

    for frame in batch {
        let frame_end = frame_start + frame.size();
        if skip_bytes < frame_end {
            let offset = skip_bytes.saturating_sub(frame_start);
            slices.push(IoSlice::new(&frame.as_bytes()[offset..]));
        }
        frame_start = frame_end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameParser, FRAME_OVERHEAD};
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn json_frame(text: &str) -> OutboundFrame {
        OutboundFrame::from_command(&Command::json(text)).unwrap()
    }

    #[test]
    fn test_outbound_frame_from_command() {
        let frame = json_frame("{}");
        // tag + length prefix + two UTF-16 code units
        assert_eq!(frame.size(), FRAME_OVERHEAD + 2 + 4 + 4);
    }

    #[test]
    fn test_default_queue_limits() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_frame_reaches_peer_unchanged() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        let frame = json_frame(r#"{"id":1}"#);
        let expected = frame.as_bytes().to_vec();
        handle.send(frame).await.unwrap();

        let mut buf = vec![0u8; expected.len()];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_writer_batching_preserves_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        for i in 0..10 {
            handle.send(json_frame(&format!("{{\"id\":{}}}", i))).await.unwrap();
        }
        drop(handle);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();

        let mut parser = FrameParser::new();
        parser.push(&received);
        let ids: Vec<String> = parser
            .drain()
            .into_iter()
            .filter_map(|c| c.as_json().map(str::to_string))
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("{{\"id\":{}}}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_backpressure_timeout() {
        // Nobody reads the peer, so the duplex fills and frames stay pending
        let (client, _server) = duplex(64);
        let config = WriterConfig {
            max_pending_frames: 1,
            channel_capacity: 8,
            backpressure_timeout: Duration::from_millis(50),
        };
        let (handle, _task) = spawn_writer_task(client, config);

        let big = OutboundFrame::new(Bytes::from(vec![0u8; 1024]));
        handle.send(big.clone()).await.unwrap();
        assert!(handle.is_backpressure_active());

        let result = handle.send(big).await;
        assert!(matches!(result, Err(TcpwireError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_send_after_task_stopped() {
        let (client, _server) = duplex(64);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());
        task.abort();
        let _ = task.await;

        let result = handle.send(json_frame("{}")).await;
        assert!(matches!(result, Err(TcpwireError::ConnectionClosed)));
        assert!(handle.is_closed());
        assert_eq!(handle.pending_count(), 0);
    }

    #[test]
    fn test_slices_cover_whole_batch() {
        let batch = vec![json_frame("a"), json_frame("b")];
        let slices = build_remaining_slices(&batch, 0);

        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), batch[0].size());
    }

    #[test]
    fn test_slices_resume_inside_frame() {
        let batch = vec![json_frame("a"), json_frame("b")];
        let slices = build_remaining_slices(&batch, 5);

        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), batch[0].size() - 5);
        assert_eq!(slices[1].len(), batch[1].size());
    }

    #[test]
    fn test_slices_skip_written_frame() {
        let batch = vec![json_frame("a"), json_frame("b")];
        let slices = build_remaining_slices(&batch, batch[0].size());

        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), batch[1].size());
    }

    #[tokio::test]
    async fn test_write_batch_writes_every_byte() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| json_frame("abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        let total: usize = batch.iter().map(OutboundFrame::size).sum();
        assert_eq!(buf.into_inner().len(), total);
    }

    #[tokio::test]
    async fn test_task_ends_when_handles_dropped() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
