//! Transport module - TCP connection and line-level reading.
//!
//! Provides:
//! - [`connect`] - TCP connect with timeout
//! - [`spawn_reader_task`] - frames incoming bytes into [`TransportEvent`]s
//!
//! Writing lives in the writer task; the dispatcher only sees lines.

mod reader;
mod tcp;

pub use reader::{spawn_reader_task, TransportEvent};
pub use tcp::connect;
