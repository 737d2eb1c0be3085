//! Keyed mutual exclusion with a bounded wait.
//!
//! Order and purchase-order operations span several streams (ledger keys, slot
//! days, the order itself), so they are serialized per order id here rather than
//! by a single stream version. Locks are not reentrant.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::command_dispatcher::DispatchError;

#[derive(Debug)]
pub struct KeyedLocks<K> {
    held: Mutex<HashSet<K>>,
    released: Condvar,
    timeout: Duration,
}

/// Held lock on one key; released on drop.
#[derive(Debug)]
pub struct KeyGuard<'a, K>
where
    K: Eq + Hash + Copy,
{
    locks: &'a KeyedLocks<K>,
    key: K,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Copy + std::fmt::Display,
{
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait up to the configured timeout for `key`, then give up with `LockTimeout`.
    pub fn acquire(&self, key: K) -> Result<KeyGuard<'_, K>, DispatchError> {
        let deadline = Instant::now() + self.timeout;
        let mut held = self
            .held
            .lock()
            .map_err(|_| DispatchError::InvariantViolation("lock registry poisoned".to_string()))?;

        while held.contains(&key) {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(key = %key, timeout_ms = self.timeout.as_millis() as u64, "lock wait timed out");
                return Err(DispatchError::LockTimeout(format!(
                    "{key} is busy, gave up after {}ms",
                    self.timeout.as_millis()
                )));
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| DispatchError::InvariantViolation("lock registry poisoned".to_string()))?;
            held = guard;
        }

        held.insert(key);
        Ok(KeyGuard { locks: self, key })
    }

    pub fn is_held(&self, key: &K) -> bool {
        self.held.lock().map(|h| h.contains(key)).unwrap_or(false)
    }
}

impl<K> Drop for KeyGuard<'_, K>
where
    K: Eq + Hash + Copy,
{
    fn drop(&mut self) {
        if let Ok(mut held) = self.locks.held.lock() {
            held.remove(&self.key);
        }
        self.locks.released.notify_all();
    }
}
