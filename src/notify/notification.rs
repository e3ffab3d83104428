//! Server-pushed notification lines.
//!
//! A notification arrives outside any request/response cycle. Its first
//! token is the event keyword prefixed with `notify`; the rest of the line
//! uses the ordinary record syntax:
//!
//! ```text
//! notifytextmessage targetmode=3 msg=hello invokerid=5 invokername=guest
//! ```

use crate::codec::{parse_records, Record};

/// Prefix shared by every notification keyword.
pub const NOTIFY_PREFIX: &str = "notify";

/// A parsed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Event keyword without the `notify` prefix (e.g. `cliententerview`).
    pub event: String,
    /// Parsed records following the keyword.
    pub payload: Vec<Record>,
}

impl Notification {
    /// Parse a line if it is a notification.
    ///
    /// Returns `None` for response data and status lines.
    pub fn parse(line: &str) -> Option<Self> {
        let (keyword, rest) = match line.split_once(' ') {
            Some((keyword, rest)) => (keyword, rest),
            None => (line, ""),
        };

        let event = keyword.strip_prefix(NOTIFY_PREFIX)?;
        if event.is_empty() || event.contains('=') {
            return None;
        }

        Some(Self {
            event: event.to_string(),
            payload: parse_records(rest),
        })
    }

    /// First record of the payload, if any.
    pub fn first(&self) -> Option<&Record> {
        self.payload.first()
    }
}
