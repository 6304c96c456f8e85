use crate::store::BackendKind;

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every failure a cache operation can surface.
///
/// An absent key is never an error: `fetch`, `pop`, `exists` and `get` all have
/// a defined non-failing answer for it.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend cannot perform this operation, e.g. enumerating a key-value server.
    #[error("{backend} backend does not support `{operation}`")]
    UnsupportedOperation {
        backend: BackendKind,
        operation: &'static str,
    },

    /// The scope is not configured for a schema-bound backend.
    #[error("unknown scope: {0}")]
    UnknownScope(String),

    /// The driver connection was lost, never established, or closed.
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable { backend: BackendKind, reason: String },

    /// Any failure of the underlying store.
    #[error("{backend} backend I/O error: {source}")]
    BackendIo {
        backend: BackendKind,
        #[source]
        source: BoxError,
    },

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid descriptor `{descriptor}`: {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    /// The key cannot be addressed by the backend.
    #[error("invalid key `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },

    /// The value cannot be stored as given.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid scope config: {0}")]
    InvalidScopeConfig(String),

    /// A fallible compute closure failed; nothing was stored.
    #[error("compute failed: {0}")]
    Compute(#[source] BoxError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn unsupported(backend: BackendKind, operation: &'static str) -> Self {
        CacheError::UnsupportedOperation { backend, operation }
    }

    pub fn io(backend: BackendKind, source: impl Into<BoxError>) -> Self {
        CacheError::BackendIo {
            backend,
            source: source.into(),
        }
    }

    pub fn unavailable(backend: BackendKind, reason: impl Into<String>) -> Self {
        CacheError::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    pub fn invalid_key(key: &str, reason: impl Into<String>) -> Self {
        CacheError::InvalidKey {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_descriptor(descriptor: &str, reason: impl Into<String>) -> Self {
        CacheError::InvalidDescriptor {
            descriptor: descriptor.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, CacheError::UnsupportedOperation { .. })
    }
}

/// Attaches the backend kind to a driver error.
pub(crate) trait IoContext<T> {
    fn backend_io(self, backend: BackendKind) -> Result<T>;
}

impl<T, E> IoContext<T> for std::result::Result<T, E>
where
    E: Into<BoxError>,
{
    fn backend_io(self, backend: BackendKind) -> Result<T> {
        self.map_err(|e| CacheError::io(backend, e))
    }
}
