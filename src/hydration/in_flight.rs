use crate::store::Key;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::collections::HashMap;
use std::sync::Arc;

type Slot = (Option<String>, Key);

/// Registry of per-(scope, key) mutexes for callers that are mid check-then-act.
///
/// An entry exists only while some caller holds or waits on it, so distinct
/// keys never contend and the registry does not grow with the keyspace.
#[derive(Debug, Default)]
pub struct KeyLocks {
    mapping: Mutex<HashMap<Slot, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until no other caller holds the lock for this address.
    pub fn lock(&self, key: &str, scope: Option<&str>) -> KeyGuard<'_> {
        let slot = (scope.map(str::to_string), key.to_string());
        let mutex = Arc::clone(self.mapping.lock().entry(slot.clone()).or_default());
        let guard = mutex.lock_arc();
        KeyGuard {
            locks: self,
            slot,
            guard: Some(guard),
        }
    }

    /// Number of addresses currently locked or awaited.
    pub fn in_flight(&self) -> usize {
        self.mapping.lock().len()
    }
}

/// Holds one address of a [`KeyLocks`] registry until dropped.
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    slot: Slot,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();

        // Waiters clone the Arc under the mapping lock, so a count of one here
        // means nobody else can reach this entry.
        let mut mapping = self.locks.mapping.lock();
        if mapping
            .get(&self.slot)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            mapping.remove(&self.slot);
        }
    }
}
