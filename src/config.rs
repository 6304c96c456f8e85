use crate::error::{CacheError, IoContext, Result};
use crate::scope::ScopeConfig;
use crate::store::discrete_files::FileFormat;
use crate::store::BackendKind;
use serde::Deserialize;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;

/// Construction parameters a descriptor cannot carry itself.
///
/// Query parameters on the descriptor take precedence over these.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// Table layouts for relational backends. Ignored by other backends.
    pub scopes: Vec<ScopeConfig>,
    /// Key prefix for remote key-value backends.
    pub namespace: Option<String>,
    /// Index used by search-index backends for unscoped calls.
    pub default_index: Option<String>,
    pub file_format: FileFormat,
    pub suffix: Option<String>,
    /// Bounds a memory backend with least-recently-used eviction.
    pub capacity: Option<NonZeroUsize>,
    /// When false, a memory backend puts every scope in one partition.
    pub scoped: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        ResolverOptions {
            scopes: Vec::new(),
            namespace: None,
            default_index: None,
            file_format: FileFormat::default(),
            suffix: None,
            capacity: None,
            scoped: true,
        }
    }
}

impl ResolverOptions {
    pub fn with_scope(mut self, scope: ScopeConfig) -> Self {
        self.scopes.push(scope);
        self
    }
}

/// A complete cache definition, e.g.
///
/// ```json
/// {"descriptor": "sqlite:///var/cache/app.db", "scopes": [{"scope": "a", "columns": ["id", "name"]}]}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub descriptor: String,
    #[serde(flatten)]
    pub options: ResolverOptions,
}

impl CacheConfig {
    pub fn new(descriptor: impl Into<String>) -> Self {
        CacheConfig {
            descriptor: descriptor.into(),
            options: ResolverOptions::default(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).backend_io(BackendKind::File)?;
        Self::from_json_str(&json).map_err(|e| match e {
            CacheError::Serialization(e) => {
                CacheError::invalid_descriptor(&path.display().to_string(), e.to_string())
            }
            other => other,
        })
    }
}
