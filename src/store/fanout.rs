use crate::error::Result;
use crate::store::{BackendKind, CacheStoreStrategy, Entry, Key};
use serde_json::Value;

/// Reads from one primary store and mirrors every write to extra writers.
///
/// Extra writers are written before the primary, so a value readable through
/// the primary has already reached every mirror.
pub struct FanoutStore {
    primary: Box<dyn CacheStoreStrategy>,
    extra_writers: Vec<Box<dyn CacheStoreStrategy>>,
}

impl FanoutStore {
    pub fn new(primary: Box<dyn CacheStoreStrategy>) -> Self {
        FanoutStore {
            primary,
            extra_writers: Vec::new(),
        }
    }

    pub fn with_writer(mut self, writer: Box<dyn CacheStoreStrategy>) -> Self {
        self.extra_writers.push(writer);
        self
    }
}

impl CacheStoreStrategy for FanoutStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Fanout
    }

    fn exists(&self, key: &str, scope: Option<&str>) -> Result<bool> {
        self.primary.exists(key, scope)
    }

    fn fetch(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        self.primary.fetch(key, scope)
    }

    fn set(&self, key: &str, value: Value, scope: Option<&str>) -> Result<Value> {
        for writer in &self.extra_writers {
            writer.set(key, value.clone(), scope)?;
        }
        self.primary.set(key, value, scope)
    }

    fn pop(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        for writer in &self.extra_writers {
            writer.pop(key, scope)?;
        }
        self.primary.pop(key, scope)
    }

    fn keys(&self, scope: Option<&str>) -> Result<Vec<Key>> {
        self.primary.keys(scope)
    }

    fn scopes(&self) -> Result<Vec<String>> {
        self.primary.scopes()
    }

    fn bulk_read(&self, scopes: Option<&[&str]>) -> Result<Vec<Entry>> {
        self.primary.bulk_read(scopes)
    }

    fn bulk_write(&self, entries: &[Entry]) -> Result<()> {
        for writer in &self.extra_writers {
            writer.bulk_write(entries)?;
        }
        self.primary.bulk_write(entries)
    }

    fn load(&self, scopes: Option<&[&str]>) -> Result<()> {
        self.primary.load(scopes)
    }

    fn backup(&self, scopes: Option<&[&str]>) -> Result<()> {
        for writer in &self.extra_writers {
            writer.backup(scopes)?;
        }
        self.primary.backup(scopes)
    }

    fn close(&self) -> Result<()> {
        for writer in &self.extra_writers {
            writer.close()?;
        }
        self.primary.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    // Lets the test keep a handle on a writer after handing it to the fanout.
    struct Shared(Arc<MemoryStore>);

    impl CacheStoreStrategy for Shared {
        fn kind(&self) -> BackendKind {
            self.0.kind()
        }

        fn exists(&self, key: &str, scope: Option<&str>) -> Result<bool> {
            self.0.exists(key, scope)
        }

        fn fetch(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
            self.0.fetch(key, scope)
        }

        fn set(&self, key: &str, value: Value, scope: Option<&str>) -> Result<Value> {
            self.0.set(key, value, scope)
        }

        fn pop(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
            self.0.pop(key, scope)
        }
    }

    #[test]
    fn writes_reach_every_writer() {
        let mirror = Arc::new(MemoryStore::new());
        let store = FanoutStore::new(Box::new(MemoryStore::new()))
            .with_writer(Box::new(Shared(Arc::clone(&mirror))));

        store.set("k", json!(1), None).unwrap();
        assert_eq!(mirror.fetch("k", None).unwrap(), Some(json!(1)));
        assert_eq!(store.fetch("k", None).unwrap(), Some(json!(1)));

        assert_eq!(store.pop("k", None).unwrap(), Some(json!(1)));
        assert!(!mirror.exists("k", None).unwrap());
    }

    #[test]
    fn reads_only_consult_primary() {
        let mirror = Arc::new(MemoryStore::new());
        mirror.set("only-mirror", json!(true), None).unwrap();
        let store = FanoutStore::new(Box::new(MemoryStore::new()))
            .with_writer(Box::new(Shared(Arc::clone(&mirror))));

        assert_eq!(store.fetch("only-mirror", None).unwrap(), None);
        assert_eq!(store.kind(), BackendKind::Fanout);
    }
}
