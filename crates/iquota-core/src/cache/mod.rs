//! Quota cache.
//!
//! A byte-level [`KeyValueStore`] (SQLite, or redis behind the `redis`
//! feature) under a typed [`QuotaCache`] that owns the key schema, JSON
//! encoding, negative entries and best-effort pattern scans.

mod keys;
mod quota_cache;
#[cfg(feature = "redis")]
mod redis_store;
mod sqlite;
mod traits;

pub use keys::{is_negative_key, CacheKey, NEGATIVE_MARKER};
pub use quota_cache::{QuotaCache, ScanReport};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use sqlite::SqliteStore;
pub use traits::KeyValueStore;
