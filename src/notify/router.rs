//! Subscriber registry for notifications.
//!
//! The router maps event keywords to handlers. Handlers run in subscription
//! order on the dispatcher task; they should return quickly and hand any
//! heavy work to their own task.
//!
//! # Example
//!
//! ```
//! use serverquery_client::notify::{Notification, NotificationRouter};
//!
//! let router = NotificationRouter::new();
//! let id = router.subscribe("textmessage", |n: &Notification| {
//!     println!("{} record(s)", n.payload.len());
//! });
//!
//! let notification = Notification::parse("notifytextmessage msg=hi").unwrap();
//! assert_eq!(router.dispatch(&notification), 1);
//!
//! assert!(router.unsubscribe(id));
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::Notification;

/// Callback invoked for every matching notification.
pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Identifies one subscription for [`NotificationRouter::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct RouterInner {
    /// Handlers by event keyword, in subscription order.
    subscribers: HashMap<String, Vec<(SubscriptionId, NotificationHandler)>>,
    /// Next subscription ID to assign.
    next_id: u64,
}

/// Registry mapping event keywords to handlers.
///
/// Cloning shares the registry. Handlers are called outside the internal
/// lock, so a handler may subscribe or unsubscribe.
#[derive(Clone, Default)]
pub struct NotificationRouter {
    inner: Arc<Mutex<RouterInner>>,
}

impl NotificationRouter {
    /// Create a new empty router.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RouterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler for an event keyword (without `notify` prefix).
    pub fn subscribe<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.subscribe_arc(event, Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn subscribe_arc(&self, event: &str, handler: NotificationHandler) -> SubscriptionId {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner
            .subscribers
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let mut removed = false;
        inner.subscribers.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(sub, _)| *sub != id);
            removed |= handlers.len() != before;
            !handlers.is_empty()
        });
        removed
    }

    /// Number of handlers for an event keyword.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.lock().subscribers.get(event).map_or(0, Vec::len)
    }

    /// Invoke every handler for the notification's event, in order.
    ///
    /// A panicking handler is logged and skipped. Returns the number of
    /// handlers that completed.
    pub fn dispatch(&self, notification: &Notification) -> usize {
        let handlers: Vec<NotificationHandler> = match self.lock().subscribers.get(&notification.event) {
            Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
            None => {
                tracing::trace!("No subscribers for notification '{}'", notification.event);
                return 0;
            }
        };

        let mut completed = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(notification))) {
                Ok(()) => completed += 1,
                Err(_) => {
                    tracing::warn!(
                        "Notification handler for '{}' panicked",
                        notification.event
                    );
                }
            }
        }
        completed
    }
}
