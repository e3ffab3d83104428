//! Protocol module - line framing and connection constants.
//!
//! The query protocol is line based: one command per outgoing line, and
//! incoming lines that are either response data, a status line, or a
//! pushed notification.

mod line_buffer;

pub use line_buffer::{LineBuffer, DEFAULT_MAX_LINE_LENGTH};

/// First greeting line sent by a TeamSpeak 3 server.
pub const DEFAULT_SERVER_IDENTIFIER: &str = "TS3";

/// Number of greeting lines before the server accepts commands.
pub const DEFAULT_GREETING_LINES: usize = 2;

/// Default ServerQuery TCP port.
pub const DEFAULT_QUERY_PORT: u16 = 10011;
