//! Local mirrors of server-side entities.
//!
//! List commands (`clientlist`, `channellist`, ...) return full snapshots.
//! [`EntityCache`] keeps one wrapper per live key and reconciles it against
//! each new snapshot:
//!
//! - keys seen before keep their existing wrapper instance
//! - new keys get a wrapper from the caller's factory
//! - keys absent from the snapshot are evicted
//!
//! [`EntityCache::reconcile`] diffs by key presence only. Use
//! [`EntityCache::reconcile_refresh`] to also push changed fields into
//! persisting wrappers.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Weak};

use regex::Regex;

use crate::codec::{Record, Value};

/// Keyed wrappers mirroring one server-side collection.
#[derive(Debug)]
pub struct EntityCache<K, W> {
    entries: HashMap<K, W>,
}

impl<K, W> EntityCache<K, W>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Reconcile against a snapshot, diffing by key presence.
    ///
    /// Returns the current wrapper for each keyed record, in snapshot
    /// order. Records for which `key_fn` yields `None` are skipped.
    /// Persisting wrappers are left untouched even if their fields changed.
    pub fn reconcile<KF, F>(&mut self, snapshot: &[Record], key_fn: KF, factory: F) -> Vec<&W>
    where
        KF: Fn(&Record) -> Option<K>,
        F: FnMut(&Record) -> W,
    {
        self.reconcile_refresh(snapshot, key_fn, factory, |_, _| {})
    }

    /// Like [`reconcile`](Self::reconcile), but calls `update` for every
    /// wrapper whose key persisted from the previous snapshot.
    pub fn reconcile_refresh<KF, F, U>(
        &mut self,
        snapshot: &[Record],
        key_fn: KF,
        mut factory: F,
        mut update: U,
    ) -> Vec<&W>
    where
        KF: Fn(&Record) -> Option<K>,
        F: FnMut(&Record) -> W,
        U: FnMut(&mut W, &Record),
    {
        let mut remainder: HashSet<K> = self.entries.keys().cloned().collect();
        let mut order = Vec::with_capacity(snapshot.len());

        for record in snapshot {
            let Some(key) = key_fn(record) else {
                tracing::debug!("Skipping snapshot record without key");
                continue;
            };

            if remainder.remove(&key) {
                if let Some(wrapper) = self.entries.get_mut(&key) {
                    update(wrapper, record);
                }
            } else if !self.entries.contains_key(&key) {
                self.entries.insert(key.clone(), factory(record));
            }
            order.push(key);
        }

        for key in &remainder {
            self.entries.remove(key);
        }
        if !remainder.is_empty() {
            tracing::trace!("Evicted {} stale entities", remainder.len());
        }

        order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .collect()
    }

    /// Wrapper for a key, if it is live.
    pub fn get(&self, key: &K) -> Option<&W> {
        self.entries.get(key)
    }

    /// Whether a key is live.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of live wrappers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no wrapper is live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Live wrappers, in no particular order.
    pub fn values(&self) -> impl Iterator<Item = &W> {
        self.entries.values()
    }

    /// Drop every wrapper.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K, W> Default for EntityCache<K, W>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Key extractor reading an integer field, e.g. `int_key("clid")`.
pub fn int_key(field: &'static str) -> impl Fn(&Record) -> Option<i64> {
    move |record| record.get(field).and_then(Value::as_int)
}

/// Ready-made wrapper: key, backing record and a non-owning parent link.
#[derive(Debug)]
pub struct CachedEntity<K, P> {
    key: K,
    record: Record,
    parent: Weak<P>,
}

impl<K, P> CachedEntity<K, P> {
    /// Create a wrapper holding a weak link to `parent`.
    pub fn new(key: K, record: Record, parent: &Arc<P>) -> Self {
        Self {
            key,
            record,
            parent: Arc::downgrade(parent),
        }
    }

    /// Key the wrapper is stored under.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Backing record as last fetched.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// The owning facade, if it is still alive.
    pub fn parent(&self) -> Option<Arc<P>> {
        self.parent.upgrade()
    }

    /// Replace the backing record.
    pub fn refresh(&mut self, record: Record) {
        self.record = record;
    }
}

/// Anything exposing a backing record, so it can be filtered.
pub trait AsRecord {
    /// Record the filter criteria are checked against.
    fn as_record(&self) -> &Record;
}

impl AsRecord for Record {
    fn as_record(&self) -> &Record {
        self
    }
}

impl<K, P> AsRecord for CachedEntity<K, P> {
    fn as_record(&self) -> &Record {
        &self.record
    }
}

impl<T: AsRecord + ?Sized> AsRecord for &T {
    fn as_record(&self) -> &Record {
        (**self).as_record()
    }
}

/// One filter condition on a record field.
#[derive(Debug, Clone)]
pub enum Criterion {
    /// Equality. `Int` and `Bool` compare numerically. `Str` compares
    /// numerically against an integer field when it parses as one, and by
    /// text otherwise. `List` passes if any element matches.
    Exact(Value),
    /// Regex over the field's text form.
    Pattern(Regex),
}

impl Criterion {
    /// Whether `field` satisfies this criterion.
    pub fn matches(&self, field: &Value) -> bool {
        match self {
            Criterion::Exact(expected) => exact_match(expected, field),
            Criterion::Pattern(re) => re.is_match(&field.to_string()),
        }
    }
}

fn exact_match(expected: &Value, field: &Value) -> bool {
    match expected {
        Value::Int(_) | Value::Bool(_) => {
            matches!((expected.as_int(), field.as_int()), (Some(a), Some(b)) if a == b)
        }
        Value::Str(s) => match (field, expected.as_int()) {
            (Value::Int(n), Some(wanted)) => *n == wanted,
            _ => field.to_string() == *s,
        },
        Value::List(options) => options.iter().any(|option| exact_match(option, field)),
    }
}

impl From<Value> for Criterion {
    fn from(value: Value) -> Self {
        Criterion::Exact(value)
    }
}

impl From<Regex> for Criterion {
    fn from(re: Regex) -> Self {
        Criterion::Pattern(re)
    }
}

/// Whether `record` has every criterion key and each one matches.
pub fn matches(record: &Record, criteria: &[(&str, Criterion)]) -> bool {
    criteria.iter().all(|(key, criterion)| {
        record
            .get(*key)
            .is_some_and(|field| criterion.matches(field))
    })
}

/// Keep the entities matching every criterion, preserving order.
///
/// Empty criteria keep everything.
pub fn filter<'a, E, I>(entities: I, criteria: &[(&str, Criterion)]) -> Vec<&'a E>
where
    E: AsRecord + ?Sized + 'a,
    I: IntoIterator<Item = &'a E>,
{
    entities
        .into_iter()
        .filter(|entity| matches(entity.as_record(), criteria))
        .collect()
}
