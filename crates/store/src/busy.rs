//! Busy flags: at most one in-flight mutating operation per key.
//!
//! A key is a file or repository URL, or the name of a global operation
//! such as `"findRepositories"`. Flags are held by a [`BusyGuard`] and
//! released when it drops, so every exit path (early return, `?`, panic
//! unwinding) clears them.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct BusyFlags {
    keys: Mutex<HashSet<String>>,
}

impl BusyFlags {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set is always left consistent, so a panic elsewhere doesn't matter.
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    /// Set the flag for `key`, or return `None` if it's already set.
    pub fn acquire(&self, key: &str) -> Option<BusyGuard<'_>> {
        self.lock().insert(key.to_string()).then(|| BusyGuard {
            flags: self,
            key: key.to_string(),
        })
    }
}

/// Holds a busy flag until dropped.
#[derive(Debug)]
pub struct BusyGuard<'a> {
    flags: &'a BusyFlags,
    key: String,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flags.lock().remove(&self.key);
    }
}
