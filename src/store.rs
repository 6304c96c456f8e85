pub mod discrete_files;
pub mod fanout;
pub mod memory;
pub mod noop;
pub mod relational;
pub mod remote_kv;
pub mod replacement;
pub mod search_index;
pub mod tiered;

use crate::error::{CacheError, Result};
use serde_json::Value;
use std::fmt;

pub type Key = String;

/// Which storage strategy sits behind a cache.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum BackendKind {
    Memory,
    File,
    Relational,
    SearchIndex,
    RemoteKv,
    Tiered,
    Fanout,
    NoOp,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Relational => "relational",
            BackendKind::SearchIndex => "search-index",
            BackendKind::RemoteKv => "remote-kv",
            BackendKind::Tiered => "tiered",
            BackendKind::Fanout => "fanout",
            BackendKind::NoOp => "noop",
        };
        f.write_str(name)
    }
}

/// One stored value together with its address.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub scope: Option<String>,
    pub key: Key,
    pub value: Value,
}

impl Entry {
    pub fn new(scope: Option<&str>, key: impl Into<Key>, value: Value) -> Self {
        Entry {
            scope: scope.map(str::to_string),
            key: key.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Shallow-merge object fields into the stored object instead of replacing it.
    pub merge: bool,
}

/// The capability set every physical backend exposes.
///
/// Scope is `None` for the default partition. Backends without partitioning
/// ignore it. Reads of an absent key answer `None`, never an error.
pub trait CacheStoreStrategy: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn exists(&self, key: &str, scope: Option<&str>) -> Result<bool>;

    fn fetch(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>>;

    /// Unconditional overwrite. Returns the value as stored, which for
    /// schema-bound backends is the coerced record.
    fn set(&self, key: &str, value: Value, scope: Option<&str>) -> Result<Value>;

    fn update(
        &self,
        key: &str,
        value: Value,
        scope: Option<&str>,
        options: &UpdateOptions,
    ) -> Result<Value> {
        if !options.merge {
            return self.set(key, value, scope);
        }
        let merged = match self.fetch(key, scope)? {
            Some(current) => merge_objects(current, value),
            None => value,
        };
        self.set(key, merged, scope)
    }

    /// Removes the key, answering the previous value if there was one.
    fn pop(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>>;

    fn keys(&self, _scope: Option<&str>) -> Result<Vec<Key>> {
        Err(CacheError::unsupported(self.kind(), "keys"))
    }

    fn scopes(&self) -> Result<Vec<String>> {
        Err(CacheError::unsupported(self.kind(), "scopes"))
    }

    /// Reads every entry of the named scopes, or of the default partition and
    /// every scope when `None`.
    fn bulk_read(&self, scopes: Option<&[&str]>) -> Result<Vec<Entry>> {
        let names: Vec<Option<String>> = match scopes {
            Some(scopes) => scopes.iter().map(|s| Some(s.to_string())).collect(),
            None => std::iter::once(None)
                .chain(self.scopes()?.into_iter().map(Some))
                .collect(),
        };

        let mut entries = Vec::new();
        for scope in &names {
            let scope = scope.as_deref();
            for key in self.keys(scope)? {
                if let Some(value) = self.fetch(&key, scope)? {
                    entries.push(Entry::new(scope, key, value));
                }
            }
        }
        Ok(entries)
    }

    /// Writes entries in order, stopping at the first failure. Earlier writes stay.
    fn bulk_write(&self, entries: &[Entry]) -> Result<()> {
        for entry in entries {
            self.set(&entry.key, entry.value.clone(), entry.scope.as_deref())?;
        }
        Ok(())
    }

    /// Pulls persisted entries into the working representation. No-op without a persistent tier.
    fn load(&self, _scopes: Option<&[&str]>) -> Result<()> {
        Ok(())
    }

    /// Flushes the working representation to the persistent tier. No-op without one.
    fn backup(&self, _scopes: Option<&[&str]>) -> Result<()> {
        Ok(())
    }

    /// Releases the driver handle.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn merge_objects(current: Value, incoming: Value) -> Value {
    match (current, incoming) {
        (Value::Object(mut current), Value::Object(incoming)) => {
            current.extend(incoming);
            Value::Object(current)
        }
        (_, incoming) => incoming,
    }
}

/// Renders a scalar the way it appears when used as a key.
pub(crate) fn render_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
