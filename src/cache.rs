//! Coalescing cache for identical concurrent commands.
//!
//! Facades often fire the same read-only command from several places at
//! once (`serverinfo`, `channellist`, ...). The cache collapses those into
//! one dispatch:
//!
//! 1. The command's canonical form (keys sorted) is fingerprinted.
//! 2. The first caller creates a slot and dispatches; later callers with
//!    the same fingerprint attach to the slot instead.
//! 3. On settlement every attached caller receives the same outcome, in
//!    attach order.
//! 4. The settled slot keeps answering for a short grace window, then is
//!    evicted.
//!
//! This is de-duplication, not caching with expiry: a slot never outlives
//! its grace window.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::codec::{Command, Record};
use crate::error::{QueryError, Result};

/// Default grace window after settlement.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_millis(50);

/// Outcome shared by every caller of one slot.
pub type SharedOutcome = Result<Arc<Vec<Record>>>;

/// CRC-32 of a command's canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u32);

impl Fingerprint {
    /// Fingerprint a canonical command line.
    pub fn of_canonical(canonical: &str) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(canonical.as_bytes());
        Self(hasher.finalize())
    }

    /// Fingerprint a command.
    ///
    /// # Errors
    ///
    /// Returns the command's serialization error.
    pub fn of(command: &Command) -> Result<Self> {
        Ok(Self::of_canonical(&command.canonical()?))
    }

    /// Raw checksum.
    #[inline]
    pub fn value(&self) -> u32 {
        self.0
    }
}

enum SlotState {
    InFlight(Vec<oneshot::Sender<SharedOutcome>>),
    Settled(SharedOutcome),
}

struct CacheSlot {
    /// Canonical line, compared to rule out fingerprint collisions.
    canonical: String,
    /// Distinguishes a slot from a later one reusing the fingerprint.
    generation: u64,
    state: SlotState,
}

/// What a caller has to do after looking up its slot.
enum Lookup {
    Ready(SharedOutcome),
    Wait(oneshot::Receiver<SharedOutcome>),
    Lead(oneshot::Receiver<SharedOutcome>, u64),
    Bypass,
}

#[derive(Default)]
struct CacheInner {
    slots: HashMap<Fingerprint, CacheSlot>,
}

/// Request-coalescing cache.
///
/// Cloning shares the slot map.
#[derive(Clone)]
pub struct CoalescingCache {
    inner: Arc<Mutex<CacheInner>>,
    next_generation: Arc<AtomicU64>,
    grace: Duration,
}

impl CoalescingCache {
    /// Create a cache with the given grace window.
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            next_generation: Arc::new(AtomicU64::new(0)),
            grace,
        }
    }

    /// Configured grace window.
    #[inline]
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Number of live slots (in flight or within their grace window).
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    /// Whether there is no live slot.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `command` through the cache.
    ///
    /// `dispatch` receives the encoded line and is called at most once per
    /// live slot. It runs on its own task, so a caller giving up does not
    /// strand the others.
    ///
    /// # Errors
    ///
    /// Serialization errors are returned synchronously; everything else is
    /// the dispatched command's own outcome.
    pub async fn call<F, Fut>(&self, command: &Command, dispatch: F) -> SharedOutcome
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<Record>>> + Send + 'static,
    {
        let canonical = command.canonical()?;
        let line = command.encode()?;
        let fingerprint = Fingerprint::of_canonical(&canonical);

        let lookup = self.lookup(fingerprint, canonical);
        let rx = match lookup {
            Lookup::Ready(outcome) => return outcome,
            Lookup::Wait(rx) => rx,
            Lookup::Lead(rx, generation) => {
                let cache = self.clone();
                tokio::spawn(async move {
                    let outcome = dispatch(line).await.map(Arc::new);
                    cache.settle(fingerprint, generation, outcome).await;
                });
                rx
            }
            Lookup::Bypass => return dispatch(line).await.map(Arc::new),
        };

        rx.await.unwrap_or(Err(QueryError::ConnectionClosed))
    }

    fn lookup(&self, fingerprint: Fingerprint, canonical: String) -> Lookup {
        let mut inner = self.lock();

        if let Some(slot) = inner.slots.get_mut(&fingerprint) {
            if slot.canonical != canonical {
                tracing::debug!(
                    "Fingerprint collision {:08x}, bypassing cache",
                    fingerprint.value()
                );
                return Lookup::Bypass;
            }
            return match &mut slot.state {
                SlotState::Settled(outcome) => Lookup::Ready(outcome.clone()),
                SlotState::InFlight(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Lookup::Wait(rx)
                }
            };
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        inner.slots.insert(
            fingerprint,
            CacheSlot {
                canonical,
                generation,
                state: SlotState::InFlight(vec![tx]),
            },
        );
        Lookup::Lead(rx, generation)
    }

    async fn settle(&self, fingerprint: Fingerprint, generation: u64, outcome: SharedOutcome) {
        let waiters = {
            let mut inner = self.lock();
            match inner.slots.get_mut(&fingerprint) {
                Some(slot) if slot.generation == generation => {
                    match std::mem::replace(&mut slot.state, SlotState::Settled(outcome.clone())) {
                        SlotState::InFlight(waiters) => waiters,
                        SlotState::Settled(_) => Vec::new(),
                    }
                }
                _ => Vec::new(),
            }
        };

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }

        tokio::time::sleep(self.grace).await;

        let mut inner = self.lock();
        if inner
            .slots
            .get(&fingerprint)
            .is_some_and(|slot| slot.generation == generation)
        {
            inner.slots.remove(&fingerprint);
        }
    }
}

impl Default for CoalescingCache {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{parse_records, Value};
    use crate::error::ProtocolError;
    use std::sync::atomic::AtomicUsize;

    /// Fake dispatch that counts calls and answers after `delay`.
    fn counting_dispatch(
        calls: Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl FnOnce(String) -> std::pin::Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send>>
           + Send
           + 'static {
        move |line: String| {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok(parse_records(&format!("line={}", crate::codec::escape(&line))))
            })
        }
    }

    #[test]
    fn test_fingerprint_ignores_param_order() {
        let a = Command::new("channelinfo").arg("cid", 1).arg("x", 2);
        let b = Command::new("channelinfo").arg("x", 2).arg("cid", 1);
        assert_eq!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());

        let c = Command::new("channelinfo").arg("cid", 2).arg("x", 2);
        assert_ne!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&c).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_one_dispatch() {
        let cache = CoalescingCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..5 {
            let cache = cache.clone();
            let calls = calls.clone();
            // Same parameters, different insertion order
            let command = if i % 2 == 0 {
                Command::new("serverinfo").arg("a", 1).arg("b", 2)
            } else {
                Command::new("serverinfo").arg("b", 2).arg("a", 1)
            };
            tasks.push(tokio::spawn(async move {
                cache
                    .call(&command, counting_dispatch(calls, Duration::from_millis(10)))
                    .await
            }));
        }

        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for outcome in &outcomes[1..] {
            assert!(Arc::ptr_eq(&outcomes[0], outcome));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_window() {
        let cache = CoalescingCache::new(Duration::from_millis(50));
        let calls = Arc::new(AtomicUsize::new(0));
        let command = Command::new("version");

        let first = cache
            .call(&command, counting_dispatch(calls.clone(), Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Within the window: reused without dispatching
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = cache
            .call(&command, counting_dispatch(calls.clone(), Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));

        // After the window: dispatched again
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.is_empty());
        cache
            .call(&command, counting_dispatch(calls.clone(), Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_shared_by_all_waiters() {
        let cache = CoalescingCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .call(&Command::new("channelinfo").arg("cid", 99), move |_line| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Err(QueryError::Protocol(ProtocolError::new(768, "invalid channelID")))
                    })
                    .await
            }));
        }

        for task in tasks {
            match task.await.unwrap() {
                Err(QueryError::Protocol(e)) => {
                    assert_eq!(e, ProtocolError::new(768, "invalid channelID"))
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_commands_not_coalesced() {
        let cache = CoalescingCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = Command::new("clientinfo").arg("clid", 1);
        let second = Command::new("clientinfo").arg("clid", 2);
        let a = cache.call(
            &first,
            counting_dispatch(calls.clone(), Duration::from_millis(5)),
        );
        let b = cache.call(
            &second,
            counting_dispatch(calls.clone(), Duration::from_millis(5)),
        );
        let (a, b) = tokio::join!(a, b);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.unwrap()[0]["line"], Value::Str("clientinfo clid=1".into()));
        assert_eq!(b.unwrap()[0]["line"], Value::Str("clientinfo clid=2".into()));
    }

    #[tokio::test]
    async fn test_fingerprint_collision_bypasses_cache() {
        let cache = CoalescingCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let command = Command::new("version");

        // Occupy the fingerprint with a different canonical line
        cache.lock().slots.insert(
            Fingerprint::of(&command).unwrap(),
            CacheSlot {
                canonical: "hostinfo".into(),
                generation: u64::MAX,
                state: SlotState::InFlight(Vec::new()),
            },
        );

        let outcome = cache
            .call(&command, counting_dispatch(calls.clone(), Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(outcome[0]["line"], Value::Str("version".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_serialization_error_is_synchronous() {
        let cache = CoalescingCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = cache
            .call(
                &Command::new("bad name"),
                counting_dispatch(calls.clone(), Duration::ZERO),
            )
            .await;
        assert!(matches!(result, Err(QueryError::Serialization(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_cancellation_does_not_strand_waiters() {
        let cache = CoalescingCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let command = Command::new("hostinfo");

        let leader = {
            let cache = cache.clone();
            let command = command.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .call(&command, counting_dispatch(calls, Duration::from_millis(20)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let follower = {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .call(&command, counting_dispatch(calls, Duration::ZERO))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        leader.abort();

        assert!(follower.await.unwrap().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
