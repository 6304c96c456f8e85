use crate::error::Result;
use crate::store::{BackendKind, CacheStoreStrategy, Entry, Key};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

type Partitions = HashMap<Option<String>, HashMap<Key, Value>>;

/// In-process map from (scope, key) to value.
///
/// A scope-less store folds every scope argument into the default partition.
pub struct MemoryStore {
    data: RwLock<Partitions>,
    scoped: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            data: RwLock::new(HashMap::new()),
            scoped: true,
        }
    }

    pub fn scopeless() -> Self {
        MemoryStore {
            data: RwLock::new(HashMap::new()),
            scoped: false,
        }
    }

    fn partition(&self, scope: Option<&str>) -> Option<String> {
        if self.scoped {
            scope.map(str::to_string)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStoreStrategy for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn exists(&self, key: &str, scope: Option<&str>) -> Result<bool> {
        let partition = self.partition(scope);
        Ok(self
            .data
            .read()
            .get(&partition)
            .is_some_and(|values| values.contains_key(key)))
    }

    fn fetch(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        let partition = self.partition(scope);
        Ok(self
            .data
            .read()
            .get(&partition)
            .and_then(|values| values.get(key))
            .cloned())
    }

    fn set(&self, key: &str, value: Value, scope: Option<&str>) -> Result<Value> {
        let partition = self.partition(scope);
        self.data
            .write()
            .entry(partition)
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(value)
    }

    fn pop(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        let partition = self.partition(scope);
        let mut data = self.data.write();
        let Some(values) = data.get_mut(&partition) else {
            return Ok(None);
        };
        let previous = values.remove(key);
        if values.is_empty() {
            data.remove(&partition);
        }
        Ok(previous)
    }

    fn keys(&self, scope: Option<&str>) -> Result<Vec<Key>> {
        let partition = self.partition(scope);
        Ok(self
            .data
            .read()
            .get(&partition)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Named scopes only; the default partition has no name to list.
    fn scopes(&self) -> Result<Vec<String>> {
        Ok(self.data.read().keys().flatten().cloned().collect())
    }

    /// Named scopes are read in the order requested.
    fn bulk_read(&self, scopes: Option<&[&str]>) -> Result<Vec<Entry>> {
        let data = self.data.read();
        let partitions: Vec<(Option<&str>, &HashMap<Key, Value>)> = match scopes {
            Some(scopes) => scopes
                .iter()
                .filter_map(|name| data.get(&Some(name.to_string())).map(|values| (Some(*name), values)))
                .collect(),
            None => data
                .iter()
                .map(|(partition, values)| (partition.as_deref(), values))
                .collect(),
        };

        Ok(partitions
            .into_iter()
            .flat_map(|(scope, values)| {
                values
                    .iter()
                    .map(move |(key, value)| Entry::new(scope, key.clone(), value.clone()))
            })
            .collect())
    }

    fn bulk_write(&self, entries: &[Entry]) -> Result<()> {
        let mut data = self.data.write();
        for entry in entries {
            let partition = self.partition(entry.scope.as_deref());
            data.entry(partition)
                .or_default()
                .insert(entry.key.clone(), entry.value.clone());
        }
        Ok(())
    }
}
