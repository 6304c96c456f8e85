//! A storage-agnostic cache over scope-partitioned keyspaces.
//!
//! One [`ManagedCache`] contract (`exists`, `fetch`, `set`, `update`, `get`,
//! `pop`, `keys`, `scopes`, `load`, `backup`) runs over interchangeable
//! backends: memory, files, sqlite tables, a search index, and redis.
//!
//! ```
//! use hilcat::ManagedCache;
//! use serde_json::json;
//!
//! let cache = ManagedCache::from_descriptor("memory://")?;
//! cache.set("one", json!(1), None)?;
//! assert_eq!(cache.fetch("one", None)?, Some(json!(1)));
//! assert_eq!(cache.fetch_or("two", json!(0), None)?, json!(0));
//! assert_eq!(cache.get("three", || json!(3), Some("numbers"))?, json!(3));
//! # Ok::<(), hilcat::CacheError>(())
//! ```

pub mod config;
pub mod error;
pub mod hydration;
pub mod managed_cache;
pub mod memoize;
pub mod resolver;
pub mod scope;
pub mod store;

pub use config::{CacheConfig, ResolverOptions};
pub use error::{CacheError, Result};
pub use hydration::CacheLookup;
pub use managed_cache::ManagedCache;
pub use memoize::{memoize, DefaultKey, KeyFn, Memoized, Memoizer};
pub use resolver::BackendResolver;
pub use scope::{ColumnType, ScopeConfig};
pub use store::{BackendKind, CacheStoreStrategy, Entry, Key, UpdateOptions};
