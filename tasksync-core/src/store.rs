//! In-memory keyed snapshot store with change notification.
//!
//! # Invariants
//!
//! 1. Values never alias caller state: every value entering or leaving the
//!    store is cloned.
//! 2. `set_record` notifies iff the key was absent or the stored value is
//!    structurally unequal to the incoming one.
//! 3. Subscribers run in registration order, synchronously, after the store's
//!    internal lock is released. A subscriber may therefore write to any
//!    store, including the one that is notifying it.
//! 4. `reset` never notifies.
//! 5. Nested dispatch on one thread is bounded by [`MAX_NOTIFY_DEPTH`].

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Maximum nesting of notification dispatch on a single thread.
pub const MAX_NOTIFY_DEPTH: usize = 8;

thread_local! {
    static NOTIFY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Payload handed to every subscriber on an accepted change.
#[derive(Debug, PartialEq)]
pub struct RecordChange<'a, T> {
    pub key: &'a str,
    /// Value stored before this change; `None` on first appearance of `key`.
    pub prev_value: Option<&'a T>,
    pub changed_value: Option<&'a T>,
}

/// A change callback. Identity is the `Arc` allocation: subscribing a clone
/// of the same `Arc` twice is a no-op, and `unsubscribe` matches by pointer.
pub type Subscriber<T> = Arc<dyn Fn(&RecordChange<'_, T>) + Send + Sync>;

/// Wrap a closure as a [`Subscriber`].
pub fn subscriber<T, F>(f: F) -> Subscriber<T>
where
    F: Fn(&RecordChange<'_, T>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Generic keyed store over clonable, comparable records.
pub struct KeyedSnapshotStore<T> {
    records: Mutex<BTreeMap<String, T>>,
    subscribers: Mutex<Vec<Subscriber<T>>>,
}

impl<T> Default for KeyedSnapshotStore<T> {
    fn default() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone + PartialEq> KeyedSnapshotStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding a copy of `initial`.
    pub fn from_records(initial: &BTreeMap<String, T>) -> Self {
        Self {
            records: Mutex::new(initial.clone()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Replace every stored record with `data`. Subscribers are not notified.
    ///
    /// The store takes ownership of `data`, so the caller keeps no handle
    /// through which stored values could be mutated afterwards.
    pub fn reset(&self, data: BTreeMap<String, T>) {
        *lock(&self.records) = data;
    }

    /// Keys present in `other` but absent here, in `other`'s iteration order.
    ///
    /// Presence only: values of keys held by both stores are not compared.
    pub fn new_keys(&self, other: &Self) -> Vec<String> {
        if std::ptr::eq(self, other) {
            return Vec::new();
        }
        let candidates: Vec<String> = lock(&other.records).keys().cloned().collect();
        let records = lock(&self.records);
        candidates
            .into_iter()
            .filter(|key| !records.contains_key(key))
            .collect()
    }

    /// `true` iff [`new_keys`](Self::new_keys) is non-empty.
    pub fn has_new_keys(&self, other: &Self) -> bool {
        !self.new_keys(other).is_empty()
    }

    /// Store a copy of `value` at `key` and notify subscribers, unless the
    /// key already holds an equal value. Returns whether a change was applied.
    pub fn set_record(&self, key: &str, value: &T) -> bool {
        let prev_value = {
            let mut records = lock(&self.records);
            if records.get(key) == Some(value) {
                return false;
            }
            records.insert(key.to_string(), value.clone())
        };

        self.notify(&RecordChange {
            key,
            prev_value: prev_value.as_ref(),
            changed_value: Some(value),
        });
        true
    }

    /// A copy of the value stored at `key`.
    pub fn get_record(&self, key: &str) -> Option<T> {
        lock(&self.records).get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        lock(&self.records).contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.records).keys().cloned().collect()
    }

    /// A copy of the full mapping.
    pub fn snapshot(&self) -> BTreeMap<String, T> {
        lock(&self.records).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    /// Register `subscriber`. Registering the same `Arc` again is a no-op.
    pub fn subscribe(&self, subscriber: &Subscriber<T>) {
        let mut subscribers = lock(&self.subscribers);
        if !subscribers.iter().any(|s| same_subscriber(s, subscriber)) {
            subscribers.push(Arc::clone(subscriber));
        }
    }

    /// Remove `subscriber` if registered.
    pub fn unsubscribe(&self, subscriber: &Subscriber<T>) {
        let mut subscribers = lock(&self.subscribers);
        if let Some(index) = subscribers.iter().position(|s| same_subscriber(s, subscriber)) {
            subscribers.remove(index);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    fn notify(&self, change: &RecordChange<'_, T>) {
        // Snapshot the list so callbacks can (un)subscribe or write back
        // without contending on our locks.
        let subscribers: Vec<Subscriber<T>> = lock(&self.subscribers).clone();
        if subscribers.is_empty() {
            return;
        }

        let Some(_depth) = DepthGuard::enter() else {
            tracing::warn!(
                "notification depth limit ({MAX_NOTIFY_DEPTH}) reached; dropping change for key {}",
                change.key
            );
            return;
        };

        for subscriber in &subscribers {
            subscriber(change);
        }
    }
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Option<Self> {
        NOTIFY_DEPTH.with(|depth| {
            if depth.get() >= MAX_NOTIFY_DEPTH {
                None
            } else {
                depth.set(depth.get() + 1);
                Some(DepthGuard)
            }
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        NOTIFY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn same_subscriber<T>(a: &Subscriber<T>, b: &Subscriber<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn lock<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
