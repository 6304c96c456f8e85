//! Function memoization on top of a [`ManagedCache`].
//!
//! Results are cached by derived key only: two argument values that derive the
//! same key share one cached result.

use crate::error::{CacheError, Result};
use crate::managed_cache::ManagedCache;
use crate::store::{render_key, Key};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::marker::PhantomData;
use std::sync::Arc;

/// Derives the cache key for one argument value.
pub trait KeyFn<A: ?Sized> {
    fn key(&self, args: &A) -> Result<Key>;
}

impl<A: ?Sized, F> KeyFn<A> for F
where
    F: Fn(&A) -> Key,
{
    fn key(&self, args: &A) -> Result<Key> {
        Ok(self(args))
    }
}

/// A scalar argument is its own key. Anything else is keyed by the SHA-256 of
/// its JSON encoding, whose object fields are always in sorted order.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKey;

impl<A: Serialize + ?Sized> KeyFn<A> for DefaultKey {
    fn key(&self, args: &A) -> Result<Key> {
        let value = serde_json::to_value(args)?;
        if let Some(key) = render_key(&value) {
            return Ok(key);
        }
        let digest = Sha256::digest(serde_json::to_vec(&value)?);
        Ok(hex::encode(digest))
    }
}

/// Configures how a function is memoized, then wraps it.
pub struct Memoizer<K = DefaultKey> {
    cache: Arc<ManagedCache>,
    scope: Option<String>,
    make_key: K,
}

impl Memoizer {
    pub fn new(cache: Arc<ManagedCache>) -> Self {
        Memoizer {
            cache,
            scope: None,
            make_key: DefaultKey,
        }
    }
}

impl<K> Memoizer<K> {
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn make_key<K2>(self, make_key: K2) -> Memoizer<K2> {
        Memoizer {
            cache: self.cache,
            scope: self.scope,
            make_key,
        }
    }

    pub fn wrap<A, R, F>(self, f: F) -> Memoized<A, R, F, K>
    where
        A: ?Sized,
        F: Fn(&A) -> R,
        R: Serialize + DeserializeOwned,
        K: KeyFn<A>,
    {
        Memoized {
            cache: self.cache,
            scope: self.scope,
            make_key: self.make_key,
            f,
            _marker: PhantomData,
        }
    }
}

/// A memoized function. `call` is `cache.get(make_key(args), || f(args), scope)`.
pub struct Memoized<A: ?Sized, R, F, K = DefaultKey> {
    cache: Arc<ManagedCache>,
    scope: Option<String>,
    make_key: K,
    f: F,
    _marker: PhantomData<fn(&A) -> R>,
}

impl<A, R, F, K> Memoized<A, R, F, K>
where
    A: ?Sized,
    F: Fn(&A) -> R,
    R: Serialize + DeserializeOwned,
    K: KeyFn<A>,
{
    pub fn call(&self, args: &A) -> Result<R> {
        let key = self.make_key.key(args)?;
        let value = self.cache.try_get(
            &key,
            || serde_json::to_value((self.f)(args)).map_err(CacheError::from),
            self.scope.as_deref(),
        )?;
        Ok(serde_json::from_value(value)?)
    }

    /// Drops the cached result for `args`, answering it if there was one.
    pub fn forget(&self, args: &A) -> Result<Option<Value>> {
        let key = self.make_key.key(args)?;
        self.cache.pop(&key, self.scope.as_deref())
    }

    pub fn cache(&self) -> &ManagedCache {
        &self.cache
    }
}

/// Shorthand for a default-keyed [`Memoized`] as a plain closure.
pub fn memoize<A, R, F>(
    cache: Arc<ManagedCache>,
    scope: Option<&str>,
    f: F,
) -> impl Fn(&A) -> Result<R>
where
    A: Serialize + ?Sized,
    F: Fn(&A) -> R,
    R: Serialize + DeserializeOwned,
{
    let mut memoizer = Memoizer::new(cache);
    if let Some(scope) = scope {
        memoizer = memoizer.scope(scope);
    }
    let memoized = memoizer.wrap(f);
    move |args: &A| memoized.call(args)
}
