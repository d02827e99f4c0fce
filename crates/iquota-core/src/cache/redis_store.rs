//! Redis-backed TTL store.

use super::traits::KeyValueStore;
use crate::error::{IquotaError, Result};
use std::time::Duration;
use tracing::debug;

/// `COUNT` hint per SCAN call.
const SCAN_BATCH: usize = 500;

/// Shared redis store.
///
/// Every call opens its own connection; nothing is pooled at this layer.
pub struct RedisStore {
    client: redis::Client,
    timeout: Duration,
}

impl RedisStore {
    /// Create a store for `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// Does not connect; the first operation does.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| IquotaError::Config {
            message: format!("Invalid redis url '{}': {}", url, e),
        })?;
        Ok(Self { client, timeout })
    }

    fn connect(&self) -> Result<redis::Connection> {
        let conn = self
            .client
            .get_connection_with_timeout(self.timeout)
            .map_err(|e| IquotaError::StoreUnavailable {
                message: format!("Failed to connect to redis: {}", e),
                source: Some(Box::new(e)),
            })?;
        conn.set_read_timeout(Some(self.timeout))?;
        conn.set_write_timeout(Some(self.timeout))?;
        Ok(conn)
    }
}

/// Escape glob metacharacters so `s` matches literally inside a MATCH pattern.
pub(crate) fn escape_glob(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl KeyValueStore for RedisStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connect()?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query(&mut conn)?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let mut conn = self.connect()?;
        redis::cmd("PSETEX")
            .arg(key)
            .arg(ttl_ms)
            .arg(value)
            .query::<()>(&mut conn)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connect()?;
        let removed: i64 = redis::cmd("DEL").arg(key).query(&mut conn)?;
        Ok(removed > 0)
    }

    fn keys_containing(&self, substring: &str) -> Result<Vec<String>> {
        let pattern = format!("*{}*", escape_glob(substring));
        let mut conn = self.connect()?;

        // Walk the cursor by hand so a failed batch is an error, not a short list.
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query(&mut conn)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("redis SCAN MATCH {} returned {} keys", pattern, keys.len());
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
