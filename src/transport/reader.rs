//! Reader task turning the byte stream into line events.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{QueryError, Result};
use crate::protocol::LineBuffer;

/// Event delivered by the reader task to the dispatcher.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete, trimmed, non-empty line.
    Line(String),
    /// The stream ended. `None` for a clean EOF.
    Closed(Option<QueryError>),
}

/// Spawn the reader task.
///
/// The task stops after sending [`TransportEvent::Closed`] or when the
/// receiving side is dropped.
pub fn spawn_reader_task<R>(reader: R, events: mpsc::Sender<TransportEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let outcome = read_loop(reader, &events).await;
        let reason = match outcome {
            Ok(()) => None,
            Err(e) => {
                tracing::error!("Read loop error: {}", e);
                Some(e)
            }
        };
        let _ = events.send(TransportEvent::Closed(reason)).await;
    })
}

/// Main read loop - reads bytes, frames lines and forwards them.
async fn read_loop<R>(mut reader: R, events: &mpsc::Sender<TransportEvent>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut line_buffer = LineBuffer::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for line in line_buffer.push(&buf[..n])? {
            tracing::trace!("<- {}", line);
            if events.send(TransportEvent::Line(line)).await.is_err() {
                // Dispatcher is gone; nobody is listening
                return Ok(());
            }
        }
    }
}
