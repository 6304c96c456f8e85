//! Backend selection from connection descriptors.
//!
//! | descriptor                               | backend                    |
//! |------------------------------------------|----------------------------|
//! | `memory://[?scoped=false&capacity=N]`    | memory, optionally LRU-bound |
//! | `noop://`                                | discards everything        |
//! | `file:///dir[?format=json&suffix=.json]` | one file per entry         |
//! | `sqlite:///path.db`, `sqlite://`         | relational over sqlite     |
//! | `postgres://user@host[:port]/db`         | relational over postgres   |
//! | `redis://host[:port][/db][?namespace=]`  | remote key-value           |
//! | `es://host:port[/index]`, `ess://...`    | search index over http(s)  |

use crate::config::ResolverOptions;
use crate::error::{CacheError, Result};
use crate::store::discrete_files::{DiscreteFileStore, FileFormat};
use crate::store::memory::MemoryStore;
use crate::store::noop::NoOpStore;
use crate::store::relational::postgres::PostgresExecutor;
use crate::store::relational::sqlite::SqliteExecutor;
use crate::store::relational::RelationalStore;
use crate::store::remote_kv::{RedisClient, RemoteKvStore};
use crate::store::replacement::LruReplacementStrategy;
use crate::store::search_index::{HttpIndexClient, SearchIndexStore};
use crate::store::CacheStoreStrategy;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;
use url::Url;

const DEFAULT_INDEX: &str = "cache";

/// Turns descriptors into backends. Holds no state beyond the options it was given.
pub struct BackendResolver<'a> {
    options: &'a ResolverOptions,
}

impl<'a> BackendResolver<'a> {
    pub fn new(options: &'a ResolverOptions) -> Self {
        BackendResolver { options }
    }

    pub fn resolve(&self, descriptor: &str) -> Result<Box<dyn CacheStoreStrategy>> {
        let url = Url::parse(descriptor)
            .map_err(|e| CacheError::invalid_descriptor(descriptor, e.to_string()))?;
        let mut query = Query::parse(descriptor, &url);

        let store: Box<dyn CacheStoreStrategy> = match url.scheme() {
            "memory" => self.memory(&mut query)?,
            "noop" => Box::new(NoOpStore),
            "file" => self.file(descriptor, &url, &mut query)?,
            "sqlite" => self.sqlite(&url)?,
            "postgres" | "postgresql" => self.postgres(descriptor, &mut query)?,
            "redis" | "rediss" => self.redis(&url, &mut query)?,
            "es" | "ess" => self.search_index(descriptor, &url)?,
            other => return Err(CacheError::UnsupportedScheme(other.to_string())),
        };
        query.finish()?;

        debug!(scheme = url.scheme(), backend = %store.kind(), "resolved backend");
        Ok(store)
    }

    fn memory(&self, query: &mut Query) -> Result<Box<dyn CacheStoreStrategy>> {
        let scoped = query.parsed::<bool>("scoped")?.unwrap_or(self.options.scoped);
        let capacity = query
            .parsed::<NonZeroUsize>("capacity")?
            .or(self.options.capacity);
        let memory = if scoped {
            MemoryStore::new()
        } else {
            MemoryStore::scopeless()
        };

        Ok(match capacity {
            Some(capacity) if scoped => Box::new(LruReplacementStrategy::new(capacity, Box::new(memory))?),
            Some(capacity) => Box::new(LruReplacementStrategy::scopeless(capacity, Box::new(memory))?),
            None => Box::new(memory),
        })
    }

    fn file(&self, descriptor: &str, url: &Url, query: &mut Query) -> Result<Box<dyn CacheStoreStrategy>> {
        let root = url
            .to_file_path()
            .map_err(|()| CacheError::invalid_descriptor(descriptor, "expected an absolute directory path"))?;
        let format = match query.take("format") {
            Some(format) => FileFormat::from_str(&format)
                .map_err(|reason| CacheError::invalid_descriptor(descriptor, reason))?,
            None => self.options.file_format,
        };
        let suffix = query.take("suffix").or_else(|| self.options.suffix.clone());

        let mut store = DiscreteFileStore::new(root, format)?;
        if let Some(suffix) = suffix {
            store = store.with_suffix(suffix);
        }
        Ok(Box::new(store))
    }

    fn sqlite(&self, url: &Url) -> Result<Box<dyn CacheStoreStrategy>> {
        let host = url.host_str().unwrap_or_default();
        let path = url.path();
        let executor = match (host, path) {
            ("", "" | "/" | "/:memory:") => SqliteExecutor::open_in_memory()?,
            ("", path) => SqliteExecutor::open(path)?,
            // `sqlite://relative/cache.db`
            (host, path) => SqliteExecutor::open(PathBuf::from(format!("{host}{path}")))?,
        };
        let store = RelationalStore::new(Box::new(executor), self.options.scopes.clone())?;
        Ok(Box::new(store))
    }

    /// Every query parameter is a connection option, e.g. `connect_timeout` or `sslmode`.
    fn postgres(&self, descriptor: &str, query: &mut Query) -> Result<Box<dyn CacheStoreStrategy>> {
        query.drain();
        let executor = PostgresExecutor::connect(descriptor)?;
        let store = RelationalStore::new(Box::new(executor), self.options.scopes.clone())?;
        Ok(Box::new(store))
    }

    fn redis(&self, url: &Url, query: &mut Query) -> Result<Box<dyn CacheStoreStrategy>> {
        let namespace = query.take("namespace").or_else(|| self.options.namespace.clone());

        // The remaining parameters belong to the redis client.
        let mut connection_url = url.clone();
        let rest = query.drain();
        if rest.is_empty() {
            connection_url.set_query(None);
        } else {
            connection_url.query_pairs_mut().clear().extend_pairs(rest);
        }

        let store = RemoteKvStore::new(Box::new(RedisClient::open(connection_url.as_str())?));
        Ok(Box::new(match namespace {
            Some(namespace) => store.with_namespace(namespace),
            None => store,
        }))
    }

    fn search_index(&self, descriptor: &str, url: &Url) -> Result<Box<dyn CacheStoreStrategy>> {
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| CacheError::invalid_descriptor(descriptor, "missing host"))?;
        let protocol = if url.scheme() == "ess" { "https" } else { "http" };
        let base = match url.port() {
            Some(port) => format!("{protocol}://{host}:{port}/"),
            None => format!("{protocol}://{host}/"),
        };
        let base = Url::parse(&base).map_err(|e| CacheError::invalid_descriptor(descriptor, e.to_string()))?;

        let index = url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .or_else(|| self.options.default_index.clone())
            .unwrap_or_else(|| DEFAULT_INDEX.to_string());

        let mut client = HttpIndexClient::new(base)?;
        if !url.username().is_empty() {
            client = client.with_basic_auth(url.username(), url.password().map(str::to_string));
        }
        Ok(Box::new(SearchIndexStore::new(Box::new(client), index)))
    }
}

/// Descriptor query parameters. Parameters left over after resolution are rejected.
struct Query<'d> {
    descriptor: &'d str,
    pairs: BTreeMap<String, String>,
}

impl<'d> Query<'d> {
    fn parse(descriptor: &'d str, url: &Url) -> Self {
        Query {
            descriptor,
            pairs: url.query_pairs().into_owned().collect(),
        }
    }

    fn take(&mut self, name: &str) -> Option<String> {
        self.pairs.remove(name)
    }

    fn parsed<T: FromStr>(&mut self, name: &str) -> Result<Option<T>> {
        self.take(name)
            .map(|raw| {
                raw.parse().map_err(|_| {
                    CacheError::invalid_descriptor(self.descriptor, format!("invalid `{name}`: {raw}"))
                })
            })
            .transpose()
    }

    fn drain(&mut self) -> BTreeMap<String, String> {
        std::mem::take(&mut self.pairs)
    }

    fn finish(self) -> Result<()> {
        match self.pairs.keys().next() {
            Some(name) => Err(CacheError::invalid_descriptor(
                self.descriptor,
                format!("unknown parameter `{name}`"),
            )),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeConfig;
    use crate::store::BackendKind;
    use serde_json::json;

    fn resolve(descriptor: &str) -> Result<Box<dyn CacheStoreStrategy>> {
        BackendResolver::new(&ResolverOptions::default()).resolve(descriptor)
    }

    #[test]
    fn memory_variants() {
        assert_eq!(resolve("memory://").unwrap().kind(), BackendKind::Memory);

        let scopeless = resolve("memory://?scoped=false").unwrap();
        scopeless.set("k", json!(1), Some("a")).unwrap();
        assert_eq!(scopeless.fetch("k", Some("b")).unwrap(), Some(json!(1)));

        let bounded = resolve("memory://?capacity=1").unwrap();
        bounded.set("a", json!(1), None).unwrap();
        bounded.set("b", json!(2), None).unwrap();
        assert!(!bounded.exists("a", None).unwrap());
    }

    #[test]
    fn rejects_unknown_schemes_and_bad_input() {
        assert!(matches!(resolve("ftp://host"), Err(CacheError::UnsupportedScheme(s)) if s == "ftp"));
        assert!(matches!(resolve("not a descriptor"), Err(CacheError::InvalidDescriptor { .. })));
        assert!(matches!(
            resolve("memory://?capacity=0"),
            Err(CacheError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            resolve("memory://?colour=blue"),
            Err(CacheError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn file_descriptor_with_format() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_directory_path(dir.path()).unwrap();
        let store = resolve(&format!("{url}?format=text&suffix=.txt")).unwrap();

        store.set("note", json!("hello"), None).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join(".default").join("note.txt")).unwrap(), "hello");
        assert!(resolve(&format!("{url}?format=yaml")).is_err());
    }

    #[test]
    fn sqlite_uses_configured_scopes() {
        let options = ResolverOptions::default()
            .with_scope(ScopeConfig::new("a", "id", ["id", "name"]).unwrap());
        let store = BackendResolver::new(&options).resolve("sqlite://").unwrap();

        assert_eq!(store.kind(), BackendKind::Relational);
        assert_eq!(store.scopes().unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn postgres_schemes_reach_the_driver() {
        for scheme in ["postgres", "postgresql"] {
            let refused = resolve(&format!("{scheme}://cache@127.0.0.1:1/cache?connect_timeout=2"));
            assert!(
                matches!(refused, Err(CacheError::BackendUnavailable { .. })),
                "{scheme}"
            );
        }
    }

    #[test]
    fn search_index_needs_host() {
        assert!(matches!(resolve("es://"), Err(CacheError::InvalidDescriptor { .. })));
        assert_eq!(
            resolve("ess://user:pw@localhost:9200/books").unwrap().kind(),
            BackendKind::SearchIndex
        );
    }
}
