//! Codec module - command serialization and response parsing.
//!
//! Everything here is pure text processing with no I/O:
//!
//! - [`escape`] / [`unescape`] - value escaping table
//! - [`Command`] - name, [`Params`] and flags, encoded into one line
//! - [`parse_records`], [`build_response`] - data and status line parsing
//!
//! # Example
//!
//! ```
//! use serverquery_client::codec::{build_response, Command, Value};
//!
//! let line = Command::new("clientinfo").arg("clid", 5).encode().unwrap();
//! assert_eq!(line, "clientinfo clid=5");
//!
//! let records = build_response(
//!     &[r"client_nickname=John\sDoe".to_string()],
//!     "error id=0 msg=ok",
//! )
//! .unwrap();
//! assert_eq!(records[0]["client_nickname"], Value::Str("John Doe".into()));
//! ```

mod command;
mod escape;
mod response;
mod value;

pub use command::{Command, Params};
pub use escape::{escape, unescape};
pub use response::{
    build_response, is_status_line, parse_record, parse_records, parse_status, Record,
    STATUS_KEYWORD,
};
pub use value::{ParamMap, Value};
