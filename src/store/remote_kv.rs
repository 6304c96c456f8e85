use crate::error::{CacheError, Result};
use crate::store::{BackendKind, CacheStoreStrategy, Key};
use parking_lot::Mutex;
use redis::{Commands, Connection, RedisError};
use serde_json::Value;

const BACKEND: BackendKind = BackendKind::RemoteKv;
const SEPARATOR: char = ':';

/// The driver of a remote key-value store: flat string keys, string payloads.
pub trait KvClient: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Answers whether the key existed.
    fn delete(&self, key: &str) -> Result<bool>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Every key matching a glob pattern, where scanning is available.
    fn scan(&self, _pattern: &str) -> Result<Vec<String>> {
        Err(CacheError::unsupported(BACKEND, "keys"))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A remote server with no native scoping: scopes and an optional namespace are
/// folded into the key as `namespace:scope:key`. Each part has `%` and `:`
/// percent-encoded, so no part can spill into another. Values travel JSON-encoded.
pub struct RemoteKvStore {
    client: Box<dyn KvClient>,
    namespace: Option<String>,
}

impl RemoteKvStore {
    pub fn new(client: Box<dyn KvClient>) -> Self {
        RemoteKvStore {
            client,
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn prefix(&self, scope: Option<&str>) -> String {
        let mut prefix = String::new();
        for part in [self.namespace.as_deref(), scope].into_iter().flatten() {
            prefix.push_str(&encode_part(part));
            prefix.push(SEPARATOR);
        }
        prefix
    }

    fn remote_key(&self, key: &str, scope: Option<&str>) -> String {
        format!("{}{}", self.prefix(scope), encode_part(key))
    }

    fn decode(raw: String) -> Result<Value> {
        serde_json::from_str(&raw).map_err(|e| CacheError::io(BACKEND, e))
    }
}

impl CacheStoreStrategy for RemoteKvStore {
    fn kind(&self) -> BackendKind {
        BACKEND
    }

    fn exists(&self, key: &str, scope: Option<&str>) -> Result<bool> {
        self.client.exists(&self.remote_key(key, scope))
    }

    fn fetch(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        self.client
            .get(&self.remote_key(key, scope))?
            .map(Self::decode)
            .transpose()
    }

    fn set(&self, key: &str, value: Value, scope: Option<&str>) -> Result<Value> {
        let encoded = serde_json::to_string(&value)?;
        self.client.set(&self.remote_key(key, scope), &encoded)?;
        Ok(value)
    }

    fn pop(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        let remote_key = self.remote_key(key, scope);
        let Some(previous) = self.client.get(&remote_key)? else {
            return Ok(None);
        };
        if self.client.delete(&remote_key)? {
            Self::decode(previous).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Keys directly under the scope prefix. A remainder still holding a separator
    /// belongs to a scope and is skipped.
    fn keys(&self, scope: Option<&str>) -> Result<Vec<Key>> {
        let prefix = self.prefix(scope);
        let found = self.client.scan(&format!("{}*", escape_glob(&prefix)))?;
        Ok(found
            .iter()
            .filter_map(|remote| remote.strip_prefix(&prefix))
            .filter(|rest| !rest.contains(SEPARATOR))
            .map(decode_part)
            .collect())
    }

    fn close(&self) -> Result<()> {
        self.client.close()
    }
}

fn encode_part(part: &str) -> String {
    part.replace('%', "%25").replace(SEPARATOR, "%3A")
}

fn decode_part(part: &str) -> String {
    part.replace("%3A", ":").replace("%25", "%")
}

fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A single synchronous redis connection.
pub struct RedisClient {
    connection: Mutex<Option<Connection>>,
}

impl RedisClient {
    pub fn open(url: &str) -> Result<Self> {
        let connection = redis::Client::open(url)
            .and_then(|client| client.get_connection())
            .map_err(redis_error)?;
        Ok(RedisClient {
            connection: Mutex::new(Some(connection)),
        })
    }

    fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> redis::RedisResult<T>) -> Result<T> {
        let mut guard = self.connection.lock();
        let connection = guard
            .as_mut()
            .ok_or_else(|| CacheError::unavailable(BACKEND, "connection closed"))?;
        f(connection).map_err(redis_error)
    }
}

fn redis_error(e: RedisError) -> CacheError {
    if e.is_connection_refusal() || e.is_connection_dropped() {
        CacheError::unavailable(BACKEND, e.to_string())
    } else {
        CacheError::io(BACKEND, e)
    }
}

impl KvClient for RedisClient {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|c| c.get(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_connection(|c| c.set(key, value))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.with_connection(|c| c.del::<_, i64>(key)).map(|n| n > 0)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.with_connection(|c| c.exists(key))
    }

    fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        self.with_connection(|c| Ok(c.scan_match::<_, String>(pattern)?.collect()))
    }

    fn close(&self) -> Result<()> {
        if self.connection.lock().take().is_some() {
            tracing::info!("redis connection closed");
        }
        Ok(())
    }
}
