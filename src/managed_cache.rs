use crate::config::{CacheConfig, ResolverOptions};
use crate::error::{CacheError, Result};
use crate::hydration::{CacheLookup, PullHydrator};
use crate::resolver::BackendResolver;
use crate::store::{BackendKind, CacheStoreStrategy, Key, UpdateOptions};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// The caller-facing cache: one backend, get-or-compute coordination, and a
/// lifecycle that ends with [`close`](Self::close).
///
/// Every operation takes `&self`; share a cache between threads with `Arc`.
pub struct ManagedCache {
    hydrator: PullHydrator,
    closed: AtomicBool,
}

impl ManagedCache {
    pub fn new(store: Box<dyn CacheStoreStrategy>) -> Self {
        ManagedCache {
            hydrator: PullHydrator::new(store),
            closed: AtomicBool::new(false),
        }
    }

    /// Builds the backend a connection descriptor names, e.g. `sqlite:///tmp/cache.db`.
    pub fn from_descriptor(descriptor: &str) -> Result<Self> {
        Self::from_descriptor_with(descriptor, &ResolverOptions::default())
    }

    pub fn from_descriptor_with(descriptor: &str, options: &ResolverOptions) -> Result<Self> {
        BackendResolver::new(options).resolve(descriptor).map(Self::new)
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::from_descriptor_with(&config.descriptor, &config.options)
    }

    fn store(&self) -> Result<&dyn CacheStoreStrategy> {
        let store = self.hydrator.store();
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::unavailable(store.kind(), "cache is closed"));
        }
        Ok(store)
    }

    pub fn kind(&self) -> BackendKind {
        self.hydrator.store().kind()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn exists(&self, key: &str, scope: Option<&str>) -> Result<bool> {
        self.store()?.exists(key, scope)
    }

    /// `None` when the key is absent.
    pub fn fetch(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        self.store()?.fetch(key, scope)
    }

    pub fn fetch_or(&self, key: &str, default: Value, scope: Option<&str>) -> Result<Value> {
        Ok(self.fetch(key, scope)?.unwrap_or(default))
    }

    pub fn set(&self, key: &str, value: Value, scope: Option<&str>) -> Result<Value> {
        self.store()?.set(key, value, scope)
    }

    /// The returned value is what the backend now holds, which need not equal `value`.
    pub fn update(
        &self,
        key: &str,
        value: Value,
        scope: Option<&str>,
        options: &UpdateOptions,
    ) -> Result<Value> {
        self.store()?.update(key, value, scope, options)
    }

    /// Get-or-compute. `compute` runs only on a miss, and at most once for
    /// concurrent callers racing on the same missing key.
    pub fn get<F>(&self, key: &str, compute: F, scope: Option<&str>) -> Result<Value>
    where
        F: FnOnce() -> Value,
    {
        self.lookup(key, compute, scope).map(CacheLookup::into_value)
    }

    pub fn try_get<F, E>(&self, key: &str, compute: F, scope: Option<&str>) -> Result<Value>
    where
        F: FnOnce() -> std::result::Result<Value, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        self.store()?;
        self.hydrator
            .try_lookup(key, scope, compute)
            .map(CacheLookup::into_value)
    }

    /// As [`get`](Self::get), also reporting whether the value was computed.
    pub fn lookup<F>(&self, key: &str, compute: F, scope: Option<&str>) -> Result<CacheLookup<Value>>
    where
        F: FnOnce() -> Value,
    {
        self.store()?;
        self.hydrator.lookup(key, scope, compute)
    }

    /// Removes the key, answering its previous value. `None` when it was absent.
    pub fn pop(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        self.store()?.pop(key, scope)
    }

    pub fn keys(&self, scope: Option<&str>) -> Result<Vec<Key>> {
        self.store()?.keys(scope)
    }

    pub fn scopes(&self) -> Result<Vec<String>> {
        self.store()?.scopes()
    }

    pub fn load(&self, scopes: Option<&[&str]>) -> Result<()> {
        self.store()?.load(scopes)
    }

    pub fn backup(&self, scopes: Option<&[&str]>) -> Result<()> {
        self.store()?.backup(scopes)
    }

    /// Releases the backend's driver handle. Later calls fail with
    /// [`CacheError::BackendUnavailable`]; closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(backend = %self.kind(), "closing cache");
        self.hydrator.store().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn memory() -> ManagedCache {
        ManagedCache::new(Box::new(MemoryStore::new()))
    }

    #[test]
    fn absent_keys_never_fail() {
        let cache = memory();
        assert!(!cache.exists("missing", None).unwrap());
        assert_eq!(cache.fetch("missing", None).unwrap(), None);
        assert_eq!(cache.fetch_or("missing", json!(0), None).unwrap(), json!(0));
        assert_eq!(cache.pop("missing", None).unwrap(), None);
    }

    #[test]
    fn get_skips_compute_on_hit() {
        let cache = memory();
        cache.set("k", json!("stored"), Some("s")).unwrap();

        let value = cache
            .get("k", || panic!("compute must not run on a hit"), Some("s"))
            .unwrap();
        assert_eq!(value, json!("stored"));
    }

    #[test]
    fn lookup_reports_miss_then_hit() {
        let cache = memory();
        assert_eq!(cache.lookup("k", || json!(1), None).unwrap(), CacheLookup::Miss(json!(1)));
        assert_eq!(cache.lookup("k", || json!(2), None).unwrap(), CacheLookup::Hit(json!(1)));
    }

    #[test]
    fn concurrent_misses_compute_once() {
        const CALLERS: usize = 16;
        let cache = Arc::new(memory());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get(
                            "shared",
                            || {
                                let n = calls.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(20));
                                json!(n)
                            },
                            Some("race"),
                        )
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<Value> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|v| v == &json!(0)));
    }

    #[test]
    fn distinct_keys_compute_independently() {
        let cache = Arc::new(memory());
        let calls = Arc::new(AtomicUsize::new(0));

        thread::scope(|s| {
            for i in 0..8 {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                s.spawn(move || {
                    let key = format!("k{i}");
                    cache
                        .get(&key, || json!(calls.fetch_add(1, Ordering::SeqCst)), None)
                        .unwrap();
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert_eq!(cache.keys(None).unwrap().len(), 8);
    }

    #[test]
    fn closed_cache_is_unavailable() {
        let cache = memory();
        cache.set("k", json!(1), None).unwrap();
        cache.close().unwrap();
        cache.close().unwrap();

        assert!(cache.is_closed());
        assert!(matches!(
            cache.fetch("k", None),
            Err(CacheError::BackendUnavailable { .. })
        ));
        assert!(matches!(
            cache.get("k", || json!(2), None),
            Err(CacheError::BackendUnavailable { .. })
        ));
    }
}
