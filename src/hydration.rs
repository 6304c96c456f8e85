pub mod in_flight;
pub mod pull;

pub use in_flight::{KeyGuard, KeyLocks};
pub use pull::PullHydrator;

/// How a get-or-compute lookup was satisfied.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CacheLookup<Value> {
    /// Value was found in the underlying store.
    Hit(Value),

    /// Value was not present in the underlying store and had to be computed.
    Miss(Value),
}

impl<Value> CacheLookup<Value> {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn value(&self) -> &Value {
        match self {
            CacheLookup::Hit(value) | CacheLookup::Miss(value) => value,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            CacheLookup::Hit(value) | CacheLookup::Miss(value) => value,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(Value) -> U) -> CacheLookup<U> {
        match self {
            CacheLookup::Hit(value) => CacheLookup::Hit(f(value)),
            CacheLookup::Miss(value) => CacheLookup::Miss(f(value)),
        }
    }
}
