use crate::error::Result;
use crate::store::{BackendKind, CacheStoreStrategy, Key, UpdateOptions};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;

type Slot = (Option<String>, Key);

/// Recency bookkeeping: every touch hands out a fresh tick, the smallest tick is the oldest.
#[derive(Default)]
struct UsageOrder {
    tick: u64,
    last_used: HashMap<Slot, u64>,
    by_age: BTreeMap<u64, Slot>,
}

impl UsageOrder {
    fn touch(&mut self, slot: Slot) {
        self.tick += 1;
        if let Some(previous) = self.last_used.insert(slot.clone(), self.tick) {
            self.by_age.remove(&previous);
        }
        self.by_age.insert(self.tick, slot);
    }

    fn forget(&mut self, slot: &Slot) {
        if let Some(previous) = self.last_used.remove(slot) {
            self.by_age.remove(&previous);
        }
    }

    fn pop_oldest(&mut self) -> Option<Slot> {
        let (_, slot) = self.by_age.pop_first()?;
        self.last_used.remove(&slot);
        Some(slot)
    }

    fn len(&self) -> usize {
        self.last_used.len()
    }

    fn clear(&mut self) {
        self.last_used.clear();
        self.by_age.clear();
    }
}

/// Implements the Least Recently Used replacement strategy on top of an arbitrary data store.
///
/// While it supports non-volatile data, the usage order metadata is held in memory volatile.
/// After a restart the same data is present, but the order depends on the order the underlying
/// store enumerates keys in. Usage tracking is only as complete as the traffic that goes through
/// this wrapper.
pub struct LruReplacementStrategy {
    store: Box<dyn CacheStoreStrategy>,
    usage_order: Mutex<UsageOrder>,
    max_capacity: NonZeroUsize,
    scoped: bool,
}

impl LruReplacementStrategy {
    pub fn new(max_capacity: NonZeroUsize, store: Box<dyn CacheStoreStrategy>) -> Result<Self> {
        Self::build(max_capacity, store, true)
    }

    /// For inner stores that fold every scope into one partition.
    pub fn scopeless(max_capacity: NonZeroUsize, store: Box<dyn CacheStoreStrategy>) -> Result<Self> {
        Self::build(max_capacity, store, false)
    }

    fn build(max_capacity: NonZeroUsize, store: Box<dyn CacheStoreStrategy>, scoped: bool) -> Result<Self> {
        let lru = LruReplacementStrategy {
            store,
            usage_order: Mutex::new(UsageOrder::default()),
            max_capacity,
            scoped,
        };
        lru.rehydrate()?;
        Ok(lru)
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity.get()
    }

    /// If the data store is non-volatile there might already be data present. Iterate through
    /// the keys to build out an arbitrary usage order.
    fn rehydrate(&self) -> Result<()> {
        let mut partitions = vec![None];
        if self.scoped {
            match self.store.scopes() {
                Ok(scopes) => partitions.extend(scopes.into_iter().map(Some)),
                Err(e) if e.is_unsupported() => partitions.clear(),
                Err(e) => return Err(e),
            }
        }

        let mut slots = Vec::new();
        for partition in partitions {
            let keys = match self.store.keys(partition.as_deref()) {
                Ok(keys) => keys,
                Err(e) if e.is_unsupported() => {
                    slots.clear();
                    break;
                }
                Err(e) => return Err(e),
            };
            slots.extend(keys.into_iter().map(|key| (partition.clone(), key)));
        }

        let victims = {
            let mut order = self.usage_order.lock();
            order.clear();
            for slot in slots {
                order.touch(slot);
            }
            self.overflow(&mut order)
        };
        self.evict(victims)
    }

    fn slot(&self, key: &str, scope: Option<&str>) -> Slot {
        let scope = if self.scoped { scope.map(str::to_string) } else { None };
        (scope, key.to_string())
    }

    fn overflow(&self, order: &mut UsageOrder) -> Vec<Slot> {
        let mut victims = Vec::new();
        while order.len() > self.max_capacity.get() {
            let Some(slot) = order.pop_oldest() else {
                break;
            };
            victims.push(slot);
        }
        victims
    }

    /// Runs outside the usage lock. A victim that is already gone pops as a no-op.
    fn evict(&self, victims: Vec<Slot>) -> Result<()> {
        for (scope, key) in victims {
            tracing::debug!(key, ?scope, "evicting least recently used entry");
            self.store.pop(&key, scope.as_deref())?;
        }
        Ok(())
    }

    fn record_use(&self, key: &str, scope: Option<&str>) -> Result<()> {
        let victims = {
            let mut order = self.usage_order.lock();
            order.touch(self.slot(key, scope));
            self.overflow(&mut order)
        };
        self.evict(victims)
    }
}

impl CacheStoreStrategy for LruReplacementStrategy {
    fn kind(&self) -> BackendKind {
        self.store.kind()
    }

    // Peeks: existence checks never count as usage.
    fn exists(&self, key: &str, scope: Option<&str>) -> Result<bool> {
        self.store.exists(key, scope)
    }

    // The inner store is never called with the usage lock held.
    fn fetch(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        let value = self.store.fetch(key, scope)?;
        let mut order = self.usage_order.lock();
        if value.is_some() {
            order.touch(self.slot(key, scope));
        } else {
            order.forget(&self.slot(key, scope));
        }
        Ok(value)
    }

    fn set(&self, key: &str, value: Value, scope: Option<&str>) -> Result<Value> {
        let stored = self.store.set(key, value, scope)?;
        self.record_use(key, scope)?;
        Ok(stored)
    }

    fn update(
        &self,
        key: &str,
        value: Value,
        scope: Option<&str>,
        options: &UpdateOptions,
    ) -> Result<Value> {
        let stored = self.store.update(key, value, scope, options)?;
        self.record_use(key, scope)?;
        Ok(stored)
    }

    fn pop(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        self.usage_order.lock().forget(&self.slot(key, scope));
        self.store.pop(key, scope)
    }

    fn keys(&self, scope: Option<&str>) -> Result<Vec<Key>> {
        self.store.keys(scope)
    }

    fn scopes(&self) -> Result<Vec<String>> {
        self.store.scopes()
    }

    fn load(&self, scopes: Option<&[&str]>) -> Result<()> {
        self.store.load(scopes)?;
        self.rehydrate()
    }

    fn backup(&self, scopes: Option<&[&str]>) -> Result<()> {
        self.store.backup(scopes)
    }

    fn close(&self) -> Result<()> {
        self.usage_order.lock().clear();
        self.store.close()
    }
}
