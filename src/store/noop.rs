use crate::error::Result;
use crate::store::{BackendKind, CacheStoreStrategy, Key};
use serde_json::Value;

/// Discards every write. Every read misses, so `get` always computes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpStore;

impl CacheStoreStrategy for NoOpStore {
    fn kind(&self) -> BackendKind {
        BackendKind::NoOp
    }

    fn exists(&self, _key: &str, _scope: Option<&str>) -> Result<bool> {
        Ok(false)
    }

    fn fetch(&self, _key: &str, _scope: Option<&str>) -> Result<Option<Value>> {
        Ok(None)
    }

    fn set(&self, _key: &str, value: Value, _scope: Option<&str>) -> Result<Value> {
        Ok(value)
    }

    fn pop(&self, _key: &str, _scope: Option<&str>) -> Result<Option<Value>> {
        Ok(None)
    }

    fn keys(&self, _scope: Option<&str>) -> Result<Vec<Key>> {
        Ok(Vec::new())
    }

    fn scopes(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
