//! TCP connection to a query server.
//!
//! # Example
//!
//! ```ignore
//! use serverquery_client::transport::connect;
//! use std::time::Duration;
//!
//! let stream = connect("127.0.0.1:10011", Duration::from_secs(10)).await?;
//! ```

use std::time::Duration;

use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::{QueryError, Result};

/// Open a TCP connection with a timeout.
///
/// Nagle's algorithm is disabled since every command is a small,
/// latency-sensitive line.
pub async fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<TcpStream> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(QueryError::from(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect timed out after {timeout:?}"),
            )))
        }
    };

    stream.set_nodelay(true)?;
    if let Ok(peer) = stream.peer_addr() {
        tracing::debug!("Connected to {}", peer);
    }
    Ok(stream)
}
