use crate::error::{CacheError, IoContext, Result};
use crate::store::{BackendKind, CacheStoreStrategy, Key};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde_json::Value;

const BACKEND: BackendKind = BackendKind::SearchIndex;

/// The driver of a search-index store: documents addressed by id within an index.
pub trait IndexClient: Send + Sync {
    fn exists(&self, index: &str, id: &str) -> Result<bool>;

    fn get(&self, index: &str, id: &str) -> Result<Option<Value>>;

    /// Indexes or replaces the document.
    fn index(&self, index: &str, id: &str, document: &Value) -> Result<()>;

    fn delete(&self, index: &str, id: &str) -> Result<bool>;

    fn list_ids(&self, _index: &str) -> Result<Vec<Key>> {
        Err(CacheError::unsupported(BACKEND, "keys"))
    }

    fn list_indices(&self) -> Result<Vec<String>> {
        Err(CacheError::unsupported(BACKEND, "scopes"))
    }
}

/// Each scope is an index and each key a document id. Unscoped calls use the default index.
pub struct SearchIndexStore {
    client: Box<dyn IndexClient>,
    default_index: String,
}

impl SearchIndexStore {
    pub fn new(client: Box<dyn IndexClient>, default_index: impl Into<String>) -> Self {
        SearchIndexStore {
            client,
            default_index: default_index.into(),
        }
    }

    fn index<'a>(&'a self, scope: Option<&'a str>) -> &'a str {
        scope.unwrap_or(&self.default_index)
    }
}

impl CacheStoreStrategy for SearchIndexStore {
    fn kind(&self) -> BackendKind {
        BACKEND
    }

    fn exists(&self, key: &str, scope: Option<&str>) -> Result<bool> {
        self.client.exists(self.index(scope), key)
    }

    fn fetch(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        self.client.get(self.index(scope), key)
    }

    fn set(&self, key: &str, value: Value, scope: Option<&str>) -> Result<Value> {
        self.client.index(self.index(scope), key, &value)?;
        Ok(value)
    }

    fn pop(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        let index = self.index(scope);
        let Some(previous) = self.client.get(index, key)? else {
            return Ok(None);
        };
        Ok(self.client.delete(index, key)?.then_some(previous))
    }

    fn keys(&self, scope: Option<&str>) -> Result<Vec<Key>> {
        self.client.list_ids(self.index(scope))
    }

    fn scopes(&self) -> Result<Vec<String>> {
        self.client.list_indices()
    }
}

/// Elasticsearch-style REST client (`/{index}/_doc/{id}`).
///
/// Enumerating indices or documents is not offered; scans over a search
/// index are left to the index's own query API.
pub struct HttpIndexClient {
    http: Client,
    base: Url,
    credentials: Option<(String, Option<String>)>,
}

impl HttpIndexClient {
    pub fn new(base: Url) -> Result<Self> {
        if base.cannot_be_a_base() {
            return Err(CacheError::invalid_descriptor(base.as_str(), "not a base url"));
        }
        let http = Client::builder().build().backend_io(BACKEND)?;
        Ok(HttpIndexClient {
            http,
            base,
            credentials: None,
        })
    }

    pub fn with_basic_auth(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Some((user.into(), password));
        self
    }

    fn document_url(&self, index: &str, id: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| CacheError::invalid_descriptor(self.base.as_str(), "not a base url"))?
            .pop_if_empty()
            .extend([index, "_doc", id]);
        Ok(url)
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<reqwest::blocking::Response> {
        let request = match &self.credentials {
            Some((user, password)) => request.basic_auth(user, password.as_ref()),
            None => request,
        };
        request.send().map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                CacheError::unavailable(BACKEND, e.to_string())
            } else {
                CacheError::io(BACKEND, e)
            }
        })
    }
}

impl IndexClient for HttpIndexClient {
    fn exists(&self, index: &str, id: &str) -> Result<bool> {
        let response = self.send(self.http.head(self.document_url(index, id)?))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status().map(|_| true).backend_io(BACKEND)
    }

    fn get(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let response = self.send(self.http.get(self.document_url(index, id)?))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let mut body: Value = response
            .error_for_status()
            .and_then(|r| r.json())
            .backend_io(BACKEND)?;
        Ok(body.get_mut("_source").map(Value::take))
    }

    fn index(&self, index: &str, id: &str, document: &Value) -> Result<()> {
        let request = self.http.put(self.document_url(index, id)?).json(document);
        self.send(request)?.error_for_status().backend_io(BACKEND)?;
        Ok(())
    }

    fn delete(&self, index: &str, id: &str) -> Result<bool> {
        let response = self.send(self.http.delete(self.document_url(index, id)?))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body: Value = response
            .error_for_status()
            .and_then(|r| r.json())
            .backend_io(BACKEND)?;
        Ok(body.get("result").and_then(Value::as_str) == Some("deleted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeIndex {
        documents: Mutex<HashMap<(String, String), Value>>,
    }

    impl IndexClient for FakeIndex {
        fn exists(&self, index: &str, id: &str) -> Result<bool> {
            Ok(self.documents.lock().contains_key(&(index.to_string(), id.to_string())))
        }

        fn get(&self, index: &str, id: &str) -> Result<Option<Value>> {
            Ok(self.documents.lock().get(&(index.to_string(), id.to_string())).cloned())
        }

        fn index(&self, index: &str, id: &str, document: &Value) -> Result<()> {
            self.documents
                .lock()
                .insert((index.to_string(), id.to_string()), document.clone());
            Ok(())
        }

        fn delete(&self, index: &str, id: &str) -> Result<bool> {
            Ok(self.documents.lock().remove(&(index.to_string(), id.to_string())).is_some())
        }
    }

    #[test]
    fn scopes_map_to_indices() {
        let store = SearchIndexStore::new(Box::new(FakeIndex::default()), "cache");
        store.set("doc", json!({"title": "a"}), Some("books")).unwrap();
        store.set("doc", json!({"title": "b"}), None).unwrap();

        assert_eq!(store.fetch("doc", Some("books")).unwrap(), Some(json!({"title": "a"})));
        assert_eq!(store.fetch("doc", Some("cache")).unwrap(), Some(json!({"title": "b"})));
        assert_eq!(store.pop("doc", Some("books")).unwrap(), Some(json!({"title": "a"})));
        assert_eq!(store.pop("doc", Some("books")).unwrap(), None);
    }

    #[test]
    fn enumeration_is_unsupported() {
        let store = SearchIndexStore::new(Box::new(FakeIndex::default()), "cache");

        assert!(store.keys(None).unwrap_err().is_unsupported());
        assert!(store.scopes().unwrap_err().is_unsupported());
    }

    #[test]
    fn document_urls_escape_segments() {
        let client = HttpIndexClient::new(Url::parse("http://localhost:9200/").unwrap()).unwrap();
        let url = client.document_url("books", "a b/c").unwrap();

        assert_eq!(url.as_str(), "http://localhost:9200/books/_doc/a%20b%2Fc");
    }
}
