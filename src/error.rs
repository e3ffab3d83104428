//! Error types for serverquery-client.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Error reported by the server through a non-zero status line.
///
/// A status line looks like `error id=768 msg=invalid\schannelID`; optional
/// `extra_msg` and `failed_permid` fields are carried when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    /// Status code (`id=`). Never 0 for an error.
    pub code: u32,
    /// Unescaped message text (`msg=`).
    pub message: String,
    /// Additional detail (`extra_msg=`).
    pub extra_message: Option<String>,
    /// Permission that was missing (`failed_permid=`).
    pub failed_permission: Option<u32>,
}

impl ProtocolError {
    /// Create a protocol error with only a code and message.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extra_message: None,
            failed_permission: None,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)?;
        if let Some(extra) = &self.extra_message {
            write!(f, ": {extra}")?;
        }
        if let Some(perm) = self.failed_permission {
            write!(f, " [failed permission {perm}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProtocolError {}

/// Main error type for all client operations.
///
/// Cloneable so that one outcome can be handed to every caller that shares
/// a coalesced command.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(Arc<serde_json::Error>),

    /// The server answered with a non-zero status code.
    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    /// A command could not be serialized; nothing was written.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The server greeting was missing or malformed.
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// The connection is not in the ready state.
    #[error("Not connected")]
    NotConnected,

    /// Connection closed while the command was pending.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl QueryError {
    /// Whether this error is fatal to the connection rather than local to
    /// a single command.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            QueryError::Io(_)
                | QueryError::Handshake(_)
                | QueryError::NotConnected
                | QueryError::ConnectionClosed
        )
    }

    /// The protocol error carried by this error, if any.
    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            QueryError::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for QueryError {
    fn from(err: std::io::Error) -> Self {
        QueryError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Config(Arc::new(err))
    }
}

impl From<ProtocolError> for QueryError {
    fn from(err: ProtocolError) -> Self {
        QueryError::Protocol(err)
    }
}

/// Result type alias using QueryError.
pub type Result<T> = std::result::Result<T, QueryError>;
