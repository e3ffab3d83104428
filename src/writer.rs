//! Dedicated writer task for outgoing command lines.
//!
//! The write half of the connection is owned by one task that receives
//! lines over an mpsc channel. The dispatcher never touches the socket.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher ─► mpsc::Sender<OutboundLine> ─► Writer Task ─► TCP
//! ```
//!
//! Lines already queued when the task wakes up are coalesced into a single
//! write.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{QueryError, Result};

/// Maximum lines to coalesce into a single write.
const MAX_BATCH_SIZE: usize = 64;

/// A command line ready to be written, newline included.
#[derive(Debug, Clone)]
pub struct OutboundLine {
    bytes: Bytes,
}

impl OutboundLine {
    /// Create an outbound line, appending the terminator.
    pub fn new(line: &str) -> Self {
        let mut buf = BytesMut::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(b"\n");
        Self {
            bytes: buf.freeze(),
        }
    }

    /// Encoded bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total size including the terminator.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Handle for sending lines to the writer task.
///
/// This is cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    /// Channel sender for lines.
    tx: mpsc::Sender<OutboundLine>,
    /// Lines queued but not yet written.
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<OutboundLine>, pending: Arc<AtomicUsize>) -> Self {
        Self { tx, pending }
    }

    /// Queue a line for writing.
    ///
    /// Fails with [`QueryError::ConnectionClosed`] once the writer task has
    /// stopped.
    pub async fn send(&self, line: &str) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(OutboundLine::new(line)).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            QueryError::ConnectionClosed
        })
    }

    /// Lines queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the writer task has stopped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending lines.
///
/// The task ends cleanly when every handle is dropped, and shuts the write
/// half down on its way out.
pub fn spawn_writer_task<W>(
    writer: W,
    channel_capacity: usize,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(tx, pending.clone());
    let task = tokio::spawn(async move {
        let result = writer_loop(rx, writer, pending).await;
        if let Err(e) = &result {
            tracing::error!("Writer task error: {}", e);
        }
        result
    });

    (handle, task)
}

/// Main writer loop - receives lines and writes them out.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundLine>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(line) => line,
            None => {
                // Channel closed, clean shutdown
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        write_batch(&mut writer, &batch).await?;
        pending.fetch_sub(batch_size, Ordering::Release);
    }
}

/// Write a batch of lines with a single `write_all` + `flush`.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundLine]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match batch {
        [] => return Ok(()),
        [single] => writer.write_all(single.as_bytes()).await?,
        many => {
            let total: usize = many.iter().map(OutboundLine::size).sum();
            let mut buf = BytesMut::with_capacity(total);
            for line in many {
                buf.extend_from_slice(line.as_bytes());
            }
            writer.write_all(&buf).await?;
        }
    }
    writer.flush().await?;
    Ok(())
}
