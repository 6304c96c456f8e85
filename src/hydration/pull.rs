use crate::error::{CacheError, Result};
use crate::hydration::{CacheLookup, KeyLocks};
use crate::store::CacheStoreStrategy;
use serde_json::Value;
use tracing::debug;

/// Lazily fills a store: a lookup that misses computes the value and stores it.
///
/// The check-compute-store sequence runs under the address's lock in
/// [`KeyLocks`], so racing callers on one missing key see a single compute.
pub struct PullHydrator {
    store: Box<dyn CacheStoreStrategy>,
    locks: KeyLocks,
}

impl PullHydrator {
    pub fn new(store: Box<dyn CacheStoreStrategy>) -> Self {
        PullHydrator {
            store,
            locks: KeyLocks::new(),
        }
    }

    pub fn store(&self) -> &dyn CacheStoreStrategy {
        self.store.as_ref()
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    pub fn lookup<F>(&self, key: &str, scope: Option<&str>, compute: F) -> Result<CacheLookup<Value>>
    where
        F: FnOnce() -> Value,
    {
        self.try_lookup(key, scope, || Ok::<_, CacheError>(compute()))
    }

    /// As [`lookup`](Self::lookup), but a failed compute stores nothing and
    /// surfaces as [`CacheError::Compute`].
    pub fn try_lookup<F, E>(&self, key: &str, scope: Option<&str>, compute: F) -> Result<CacheLookup<Value>>
    where
        F: FnOnce() -> std::result::Result<Value, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        if let Some(value) = self.store.fetch(key, scope)? {
            debug!(key, scope, "cache hit");
            return Ok(CacheLookup::Hit(value));
        }

        let _guard = self.locks.lock(key, scope);
        if let Some(value) = self.store.fetch(key, scope)? {
            debug!(key, scope, "cache hit after waiting on in-flight compute");
            return Ok(CacheLookup::Hit(value));
        }

        debug!(key, scope, "cache miss, computing");
        let value = compute().map_err(|e| CacheError::Compute(e.into()))?;
        let stored = self.store.set(key, value, scope)?;
        Ok(CacheLookup::Miss(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn computes_once_then_hits() {
        let hydrator = PullHydrator::new(Box::new(MemoryStore::new()));
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            json!(42)
        };

        assert_eq!(hydrator.lookup("k", None, compute).unwrap(), CacheLookup::Miss(json!(42)));
        assert_eq!(hydrator.lookup("k", None, compute).unwrap(), CacheLookup::Hit(json!(42)));
        assert_eq!(calls.get(), 1);
        assert_eq!(hydrator.locks().in_flight(), 0);
    }

    #[test]
    fn failed_compute_stores_nothing() {
        let hydrator = PullHydrator::new(Box::new(MemoryStore::new()));
        let outcome = hydrator.try_lookup("k", Some("s"), || Err::<Value, _>("boom"));

        assert!(matches!(outcome, Err(CacheError::Compute(_))));
        assert!(!hydrator.store().exists("k", Some("s")).unwrap());
    }
}
