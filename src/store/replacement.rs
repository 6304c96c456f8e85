pub mod lru;

pub use lru::LruReplacementStrategy;
