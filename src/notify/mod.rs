//! Notify module - server-pushed events.
//!
//! Provides:
//! - [`Notification`] - a parsed `notify<event>` line
//! - [`NotificationRouter`] - maps event keywords to subscriber callbacks
//!
//! Asking the server to start pushing an event is an ordinary command
//! (`servernotifyregister`), sent through the client like any other.

mod notification;
mod router;

pub use notification::{Notification, NOTIFY_PREFIX};
pub use router::{NotificationHandler, NotificationRouter, SubscriptionId};
