//! Response and status line parsing.
//!
//! A response is zero or more data lines followed by one status line:
//!
//! ```text
//! clid=1 cid=1 client_nickname=serveradmin|clid=5 cid=3 client_nickname=guest
//! error id=0 msg=ok
//! ```

use indexmap::IndexMap;

use super::escape::unescape;
use super::value::Value;
use crate::error::{ProtocolError, Result};

/// One parsed `key=value` block.
pub type Record = IndexMap<String, Value>;

/// Keyword that opens every status line.
pub const STATUS_KEYWORD: &str = "error";

/// Parse one `|`-free segment into a record.
///
/// Tokens without `=` become keys with an empty text value.
pub fn parse_record(segment: &str) -> Record {
    let mut record = Record::new();
    for token in segment.split(' ').filter(|t| !t.is_empty()) {
        match token.split_once('=') {
            Some((key, raw)) => {
                record.insert(key.to_string(), Value::parse(&unescape(raw)));
            }
            None => {
                record.insert(token.to_string(), Value::Str(String::new()));
            }
        }
    }
    record
}

/// Parse one data line into its `|`-separated records.
pub fn parse_records(line: &str) -> Vec<Record> {
    line.split('|')
        .map(parse_record)
        .filter(|r| !r.is_empty())
        .collect()
}

/// Whether a line terminates a command response.
#[inline]
pub fn is_status_line(line: &str) -> bool {
    line == STATUS_KEYWORD
        || line
            .strip_prefix(STATUS_KEYWORD)
            .is_some_and(|rest| rest.starts_with(' '))
}

/// Parse a status line, succeeding on `id=0`.
pub fn parse_status(line: &str) -> std::result::Result<(), ProtocolError> {
    let body = line.strip_prefix(STATUS_KEYWORD).unwrap_or(line);
    let fields = parse_record(body);

    let code = match fields.get("id").and_then(Value::as_int) {
        Some(code) => code,
        None => {
            return Err(ProtocolError::new(
                u32::MAX,
                format!("malformed status line: {line}"),
            ))
        }
    };
    if code == 0 {
        return Ok(());
    }

    let text = |key: &str| fields.get(key).map(|v| v.to_string());
    Err(ProtocolError {
        code: u32::try_from(code).unwrap_or(u32::MAX),
        message: text("msg").unwrap_or_default(),
        extra_message: text("extra_msg"),
        failed_permission: fields
            .get("failed_permid")
            .and_then(Value::as_int)
            .and_then(|p| u32::try_from(p).ok()),
    })
}

/// Turn the accumulated data lines and the status line into an outcome.
pub fn build_response(data_lines: &[String], status: &str) -> Result<Vec<Record>> {
    parse_status(status)?;
    Ok(data_lines
        .iter()
        .flat_map(|line| parse_records(line))
        .collect())
}
