//! # serverquery-client
//!
//! Async client for line-based ServerQuery administration interfaces
//! (TeamSpeak 3 style).
//!
//! The protocol has no request ids: responses are matched to commands by
//! position, so the client keeps exactly one command on the wire at a time
//! and interleaves unsolicited `notify*` lines separately.
//!
//! ## Architecture
//!
//! - **Codec**: escaping, command encoding, response and status parsing
//! - **Dispatcher**: one task per connection owning the FIFO, pacing gate
//!   and keepalive
//! - **Notifications**: event name to handler routing
//! - **Cache**: coalescing of identical concurrent commands
//! - **Mirror**: reconciling local entity wrappers with list snapshots
//!
//! ## Example
//!
//! ```ignore
//! use serverquery_client::{Client, Command};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder().connect("127.0.0.1:10011").await?;
//!     client.login("serveradmin", "secret").await?;
//!     client.use_server(1).await?;
//!
//!     let clients = client.submit(&Command::new("clientlist").flag("away")).await?;
//!     for record in &clients {
//!         println!("{:?}", record.get("client_nickname"));
//!     }
//!
//!     client.quit().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod mirror;
pub mod notify;
pub mod pacing;
pub mod protocol;
pub mod transport;

mod client;
mod writer;

pub use cache::CoalescingCache;
pub use client::{Client, ClientBuilder};
pub use codec::{Command, Params, Record, Value};
pub use config::ClientConfig;
pub use dispatcher::{ClientEvent, ConnectionState, DispatcherHandle};
pub use error::{ProtocolError, QueryError, Result};
pub use mirror::{filter, CachedEntity, Criterion, EntityCache};
pub use notify::{Notification, SubscriptionId};
