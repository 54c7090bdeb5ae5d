//! Keyed mutexes serializing work per stock item or per product.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One mutex per key, created on first use and dropped with its last handle.
#[derive(Debug)]
pub struct LockTable<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for LockTable<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Copy + Eq + Hash> LockTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `key`'s mutex; lock it with [`KeyLock::lock`].
    pub fn get(&self, key: K) -> KeyLock<'_, K> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        KeyLock {
            table: self,
            key,
            mutex: locks.entry(key).or_default().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handle to one key's mutex.
#[derive(Debug)]
pub struct KeyLock<'a, K: Copy + Eq + Hash> {
    table: &'a LockTable<K>,
    key: K,
    mutex: Arc<Mutex<()>>,
}

impl<K: Copy + Eq + Hash> KeyLock<'_, K> {
    /// Poisoning is ignored: the guarded data is `()`.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Copy + Eq + Hash> Drop for KeyLock<'_, K> {
    fn drop(&mut self) {
        // Handles are only cloned under the table lock, so a count of two
        // (table + self) means no other holder can appear.
        let mut locks = self.table.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&self.mutex) == 2 {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn same_key_shares_one_mutex() {
        let table = LockTable::<u32>::new();
        let a = table.get(1);
        let b = table.get(1);
        table.get(2);

        assert!(Arc::ptr_eq(&a.mutex, &b.mutex));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn released_keys_leave_the_table() {
        let table = LockTable::<u32>::new();
        let held = table.get(1);
        for key in 2..100 {
            let key_lock = table.get(key);
            let _guard = key_lock.lock();
        }
        assert_eq!(table.len(), 1);

        let again = table.get(1);
        assert!(Arc::ptr_eq(&held.mutex, &again.mutex));
        drop(held);
        assert_eq!(table.len(), 1);
        drop(again);
        assert!(table.is_empty());
    }

    #[test]
    fn holders_of_one_key_run_one_at_a_time() {
        let table = Arc::new(LockTable::<u32>::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let inside = inside.clone();
                let overlap = overlap.clone();
                thread::spawn(move || {
                    let key = table.get(7);
                    let _guard = key.lock();
                    if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }
}
