//! Key/value store trait.

use crate::error::Result;
use std::time::Duration;

/// Byte-level TTL key/value store underneath the quota cache.
///
/// Implementations expire entries on their own; nothing at this layer
/// deletes positive entries explicitly. All operations are synchronous to
/// match rusqlite's and redis's blocking clients. Any transport or protocol
/// failure must surface as `StoreUnavailable`, never as a missing key.
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, expiring `ttl` from now.
    ///
    /// Overwrites any existing entry with the same key.
    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Delete a key. Returns whether anything was removed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// All live keys containing `substring`.
    fn keys_containing(&self, substring: &str) -> Result<Vec<String>>;

    /// Short label for logs.
    fn name(&self) -> &'static str;
}
