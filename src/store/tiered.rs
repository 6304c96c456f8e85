use crate::error::Result;
use crate::store::memory::MemoryStore;
use crate::store::{BackendKind, CacheStoreStrategy, Entry, Key, UpdateOptions};
use serde_json::Value;
use tracing::info;

/// An in-memory working set in front of a persistent store.
///
/// Single-key operations only touch the working set. [`load`](CacheStoreStrategy::load)
/// and [`backup`](CacheStoreStrategy::backup) move entries between the tiers.
pub struct TieredStore {
    working: MemoryStore,
    persistent: Box<dyn CacheStoreStrategy>,
}

impl TieredStore {
    pub fn new(persistent: Box<dyn CacheStoreStrategy>) -> Self {
        TieredStore {
            working: MemoryStore::new(),
            persistent,
        }
    }

    pub fn persistent(&self) -> &dyn CacheStoreStrategy {
        self.persistent.as_ref()
    }
}

impl CacheStoreStrategy for TieredStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Tiered
    }

    fn exists(&self, key: &str, scope: Option<&str>) -> Result<bool> {
        self.working.exists(key, scope)
    }

    fn fetch(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        self.working.fetch(key, scope)
    }

    fn set(&self, key: &str, value: Value, scope: Option<&str>) -> Result<Value> {
        self.working.set(key, value, scope)
    }

    fn update(
        &self,
        key: &str,
        value: Value,
        scope: Option<&str>,
        options: &UpdateOptions,
    ) -> Result<Value> {
        self.working.update(key, value, scope, options)
    }

    fn pop(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        self.working.pop(key, scope)
    }

    fn keys(&self, scope: Option<&str>) -> Result<Vec<Key>> {
        self.working.keys(scope)
    }

    fn scopes(&self) -> Result<Vec<String>> {
        self.working.scopes()
    }

    fn bulk_read(&self, scopes: Option<&[&str]>) -> Result<Vec<Entry>> {
        self.working.bulk_read(scopes)
    }

    fn bulk_write(&self, entries: &[Entry]) -> Result<()> {
        self.working.bulk_write(entries)
    }

    /// Persisted entries overwrite working entries with the same address.
    fn load(&self, scopes: Option<&[&str]>) -> Result<()> {
        let entries = self.persistent.bulk_read(scopes)?;
        self.working.bulk_write(&entries)?;
        info!(
            backend = %self.persistent.kind(),
            entries = entries.len(),
            "loaded working set"
        );
        Ok(())
    }

    /// Entries popped from the working set stay in the persistent tier.
    fn backup(&self, scopes: Option<&[&str]>) -> Result<()> {
        let entries = self.working.bulk_read(scopes)?;
        self.persistent.bulk_write(&entries)?;
        info!(
            backend = %self.persistent.kind(),
            entries = entries.len(),
            "backed up working set"
        );
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.persistent.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::discrete_files::{DiscreteFileStore, FileFormat};
    use serde_json::json;

    fn tiered(dir: &tempfile::TempDir) -> TieredStore {
        let files = DiscreteFileStore::new(dir.path(), FileFormat::Json).unwrap();
        TieredStore::new(Box::new(files))
    }

    #[test]
    fn writes_stay_in_memory_until_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = tiered(&dir);
        store.set("k", json!("v"), Some("s")).unwrap();

        assert!(!store.persistent().exists("k", Some("s")).unwrap());
        store.backup(None).unwrap();
        assert_eq!(store.persistent().fetch("k", Some("s")).unwrap(), Some(json!("v")));
    }

    #[test]
    fn load_pulls_named_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let store = tiered(&dir);
        store.persistent().set("a", json!(1), Some("x")).unwrap();
        store.persistent().set("b", json!(2), Some("y")).unwrap();

        store.load(Some(&["x"])).unwrap();
        assert_eq!(store.fetch("a", Some("x")).unwrap(), Some(json!(1)));
        assert_eq!(store.fetch("b", Some("y")).unwrap(), None);

        store.load(None).unwrap();
        assert_eq!(store.fetch("b", Some("y")).unwrap(), Some(json!(2)));
    }

    #[test]
    fn load_then_backup_leaves_persisted_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = tiered(&dir);
        store.persistent().set("a", json!({"n": 1}), Some("x")).unwrap();
        store.persistent().set("b", json!([1, 2]), Some("y")).unwrap();
        let before = store.persistent().bulk_read(None).unwrap();

        store.load(None).unwrap();
        store.backup(None).unwrap();

        let mut after = store.persistent().bulk_read(None).unwrap();
        let mut before = before;
        before.sort_by(|a, b| a.key.cmp(&b.key));
        after.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(before, after);
    }
}
