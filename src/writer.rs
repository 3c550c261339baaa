//! Dedicated writer task for outbound command frames.
//!
//! Callers never touch the link's write half directly. Encoded frames go
//! through an mpsc channel to a single task that batches whatever is ready
//! into one write.
//!
//! ```text
//! call 1 ─┐
//! call 2 ─┼─► mpsc::Sender<OutboundFrame> ─► writer task ─► link
//! call N ─┘
//! ```

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::GatewayError;

/// Default maximum frames queued but not yet written.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 256;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default time a send may wait for queue space.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames coalesced into a single write.
const MAX_BATCH_SIZE: usize = 32;

/// A fully encoded frame ready for the link.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    bytes: Bytes,
}

impl OutboundFrame {
    /// Wrap an encoded frame (header included).
    #[inline]
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// Copy an encoded frame out of a borrowed buffer.
    #[inline]
    pub fn copy_from(frame: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(frame))
    }

    /// Encoded size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Encoded bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Frames queued but not yet written before sends start waiting.
    pub max_pending_frames: usize,
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// How long a send may wait for the queue to drain, in milliseconds.
    pub backpressure_timeout_ms: u64,
}

impl WriterConfig {
    /// Backpressure timeout as a `Duration`.
    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Handle for queueing frames on the writer task.
///
/// Cheap to clone. The task exits once every handle is dropped.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Queue a frame, waiting up to the backpressure timeout for room.
    ///
    /// Fails with `TransportFailure` when the writer task has stopped or the
    /// queue stays full past the timeout.
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), GatewayError> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_room().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        match tokio::time::timeout(self.timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.pending.fetch_sub(1, Ordering::Release);
                Err(GatewayError::link_closed())
            }
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::Release);
                Err(backpressure_timeout())
            }
        }
    }

    async fn wait_for_room(&self) -> Result<(), GatewayError> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let poll = Duration::from_micros(200);

        while self.pending.load(Ordering::Acquire) >= self.max_pending {
            if self.tx.is_closed() {
                return Err(GatewayError::link_closed());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(backpressure_timeout());
            }
            tokio::time::sleep(poll).await;
        }
        Ok(())
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the writer task has stopped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn backpressure_timeout() -> GatewayError {
    GatewayError::TransportFailure(io::Error::new(
        io::ErrorKind::WouldBlock,
        "outbound queue full",
    ))
}

/// Spawn the writer task over `writer`.
///
/// The join handle resolves when every [`WriterHandle`] is dropped (clean
/// shutdown) or a write fails.
pub fn spawn_writer_task<W>(
    writer: W,
    config: &WriterConfig,
) -> (WriterHandle, JoinHandle<io::Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames.max(1),
        config.backpressure_timeout(),
    );
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = BytesMut::new();

    while let Some(first) = rx.recv().await {
        batch.clear();
        batch.extend_from_slice(first.as_bytes());
        let mut count = 1;

        while count < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => {
                    batch.extend_from_slice(frame.as_bytes());
                    count += 1;
                }
                Err(_) => break,
            }
        }

        let written = write_batch(&mut writer, &batch).await;
        pending.fetch_sub(count, Ordering::Release);
        if let Err(e) = written {
            tracing::error!(error = %e, frames = count, "link write failed");
            return Err(e);
        }
        tracing::trace!(frames = count, bytes = batch.len(), "wrote batch");
    }

    tracing::debug!("writer channel closed");
    let _ = writer.shutdown().await;
    Ok(())
}

async fn write_batch<W>(writer: &mut W, batch: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(batch).await?;
    writer.flush().await
}
