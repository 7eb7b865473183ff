//! Per-key locking
//!
//! Serialises policy evaluation and signing for a single public key while
//! letting requests for different keys run in parallel. Locks are created
//! lazily on first use and never evicted.

use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Table of lazily created per-key mutexes
#[derive(Default)]
pub struct KeyLocker {
    locks: RwLock<HashMap<Vec<u8>, Arc<Mutex<()>>>>,
    // Held only while inserting a new entry.
    create: Mutex<()>,
}

/// Exclusive ownership of one key, released on drop
pub struct KeyLockGuard {
    key: Vec<u8>,
    guard: ArcMutexGuard<RawMutex, ()>,
}

impl KeyLockGuard {
    /// The key this guard holds
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    fn mutex(&self) -> &Arc<Mutex<()>> {
        ArcMutexGuard::mutex(&self.guard)
    }
}

impl fmt::Debug for KeyLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLockGuard")
            .field("key", &hex::encode(&self.key))
            .finish()
    }
}

impl KeyLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the caller exclusively owns `key`
    pub fn lock(&self, key: &[u8]) -> KeyLockGuard {
        let mutex = self.entry(key);
        let guard = mutex.lock_arc();
        trace!(key = %hex::encode(key), "acquired key lock");
        KeyLockGuard {
            key: key.to_vec(),
            guard,
        }
    }

    /// Release a guard explicitly.
    ///
    /// # Panics
    ///
    /// Panics if the guard was not issued by this table. That is a
    /// programming error and continuing would void the exclusion guarantee.
    pub fn unlock(&self, guard: KeyLockGuard) {
        let known = self
            .locks
            .read()
            .get(&guard.key)
            .is_some_and(|m| Arc::ptr_eq(m, guard.mutex()));
        if !known {
            panic!("attempt to unlock an unknown lock");
        }
        trace!(key = %hex::encode(&guard.key), "released key lock");
        drop(guard);
    }

    /// Number of keys that have ever been locked
    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }

    fn entry(&self, key: &[u8]) -> Arc<Mutex<()>> {
        if let Some(m) = self.locks.read().get(key) {
            return m.clone();
        }

        let _create = self.create.lock();
        // Another caller may have created it while we waited.
        if let Some(m) = self.locks.read().get(key) {
            return m.clone();
        }
        let m = Arc::new(Mutex::new(()));
        self.locks.write().insert(key.to_vec(), m.clone());
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    #[test]
    fn test_mutual_exclusion() {
        let locker = Arc::new(KeyLocker::new());
        let counter = Arc::new(AtomicU64::new(0));
        let key = vec![0x01u8; 48];

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let locker = locker.clone();
                let counter = counter.clone();
                let key = key.clone();
                thread::spawn(move || {
                    for _ in 0..1024 {
                        let guard = locker.lock(&key);
                        // Split read and write so a missing lock would lose updates.
                        let value = counter.load(Ordering::Relaxed);
                        thread::yield_now();
                        counter.store(value + 1, Ordering::Relaxed);
                        locker.unlock(guard);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::Relaxed), 16 * 1024);
        assert_eq!(locker.len(), 1);
    }

    #[test]
    fn test_distinct_keys_do_not_block() {
        let locker = KeyLocker::new();
        let a = locker.lock(b"a");
        let b = locker.lock(b"b");
        assert_eq!(a.key(), b"a");
        assert_eq!(b.key(), b"b");
        assert_eq!(locker.len(), 2);
    }

    #[test]
    fn test_drop_releases() {
        let locker = KeyLocker::new();
        {
            let _guard = locker.lock(b"key");
        }
        let guard = locker.lock(b"key");
        locker.unlock(guard);
    }

    #[test]
    #[should_panic(expected = "attempt to unlock an unknown lock")]
    fn test_unlock_foreign_guard_panics() {
        let first = KeyLocker::new();
        let second = KeyLocker::new();
        let guard = first.lock(b"key");
        second.unlock(guard);
    }
}
