//! SQLite-backed TTL store.

use super::traits::KeyValueStore;
use crate::error::{IquotaError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// SQLite-based key/value store.
///
/// One table, expiry kept as integer unix milliseconds so comparisons are
/// numeric. Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at the specified database path.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| IquotaError::Io {
                    message: format!("Failed to create cache directory: {}", e),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| IquotaError::StoreUnavailable {
            message: format!("Failed to open cache database: {}", e),
            source: Some(Box::new(e)),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| IquotaError::StoreUnavailable {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(Box::new(e)),
            })?;

        Self::from_connection(conn)
    }

    /// Store that lives only as long as the process.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| IquotaError::StoreUnavailable {
            message: format!("Failed to open in-memory cache: {}", e),
            source: Some(Box::new(e)),
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| IquotaError::store(format!("Failed to lock database: {}", e)))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                expires_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_kv_expires
                ON kv_entries(expires_at_ms);
            "#,
        )
        .map_err(|e| IquotaError::StoreUnavailable {
            message: format!("Failed to initialize cache schema: {}", e),
            source: Some(Box::new(e)),
        })?;

        Ok(())
    }

    /// Store a value with an explicit expiration time.
    pub fn set_with_expiry(&self, key: &str, value: &[u8], expires_at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT OR REPLACE INTO kv_entries (key, value, expires_at_ms) VALUES (?1, ?2, ?3)",
            params![key, value, expires_at.timestamp_millis()],
        )
        .map_err(|e| IquotaError::StoreUnavailable {
            message: format!("Failed to set cache entry: {}", e),
            source: Some(Box::new(e)),
        })?;

        Ok(())
    }

    /// Remove expired rows. Returns the number removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let conn = self.lock()?;

        let deleted = conn
            .execute(
                "DELETE FROM kv_entries WHERE expires_at_ms <= ?1",
                params![Utc::now().timestamp_millis()],
            )
            .map_err(|e| IquotaError::StoreUnavailable {
                message: format!("Failed to cleanup expired entries: {}", e),
                source: Some(Box::new(e)),
            })?;

        if deleted > 0 {
            debug!("Cleaned up {} expired cache entries", deleted);
        }

        Ok(deleted)
    }

    /// Number of live entries.
    pub fn len(&self) -> Result<usize> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM kv_entries WHERE expires_at_ms > ?1",
                params![Utc::now().timestamp_millis()],
                |row| row.get(0),
            )
            .map_err(|e| IquotaError::StoreUnavailable {
                message: format!("Failed to count cache entries: {}", e),
                source: Some(Box::new(e)),
            })?;

        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT value FROM kv_entries WHERE key = ?1 AND expires_at_ms > ?2",
            params![key, Utc::now().timestamp_millis()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| IquotaError::StoreUnavailable {
            message: format!("Failed to query cache entry: {}", e),
            source: Some(Box::new(e)),
        })
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| IquotaError::store(format!("TTL out of range: {}", e)))?;
        self.set_with_expiry(key, value, Utc::now() + ttl)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.lock()?;

        let deleted = conn
            .execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
            .map_err(|e| IquotaError::StoreUnavailable {
                message: format!("Failed to delete cache entry: {}", e),
                source: Some(Box::new(e)),
            })?;

        Ok(deleted > 0)
    }

    fn keys_containing(&self, substring: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT key FROM kv_entries
                WHERE instr(key, ?1) > 0 AND expires_at_ms > ?2
                ORDER BY key
                "#,
            )
            .map_err(|e| IquotaError::StoreUnavailable {
                message: format!("Failed to prepare key scan: {}", e),
                source: Some(Box::new(e)),
            })?;

        let keys = stmt
            .query_map(params![substring, Utc::now().timestamp_millis()], |row| row.get(0))
            .map_err(|e| IquotaError::StoreUnavailable {
                message: format!("Failed to scan keys: {}", e),
                source: Some(Box::new(e)),
            })?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache").join("iquota.db");
        let store = SqliteStore::new(&db_path).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_set_and_get() {
        let (store, _temp) = create_test_store();

        store
            .set("/ifs/home:USER:bob", b"{}", Duration::from_secs(60))
            .unwrap();

        let value = store.get("/ifs/home:USER:bob").unwrap();
        assert_eq!(value, Some(b"{}".to_vec()));
    }

    #[test]
    fn test_missing_key() {
        let (store, _temp) = create_test_store();
        assert!(store.get("/ifs/nothing").unwrap().is_none());
    }

    #[test]
    fn test_overwrite() {
        let store = SqliteStore::in_memory().unwrap();
        store.set("k", b"one", Duration::from_secs(60)).unwrap();
        store.set("k", b"two", Duration::from_secs(60)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let store = SqliteStore::in_memory().unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        store.set_with_expiry("stale", b"data", past).unwrap();

        assert!(store.get("stale").unwrap().is_none());
        assert!(store.keys_containing("stale").unwrap().is_empty());
    }

    #[test]
    fn test_short_ttl_elapses() {
        let store = SqliteStore::in_memory().unwrap();
        store.set("brief", b"data", Duration::from_millis(20)).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert!(store.get("brief").unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let store = SqliteStore::in_memory().unwrap();
        store.set("k", b"v", Duration::from_secs(60)).unwrap();
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_keys_containing_is_literal() {
        let store = SqliteStore::in_memory().unwrap();
        let ttl = Duration::from_secs(60);
        store.set("/data/projA:GROUP:teamA", b"{}", ttl).unwrap();
        store.set("/data/projA:GROUP:teamB", b"{}", ttl).unwrap();
        store.set("/data/proj_x:GROUP:teamC", b"{}", ttl).unwrap();

        let keys = store.keys_containing("projA").unwrap();
        assert_eq!(keys, vec!["/data/projA:GROUP:teamA", "/data/projA:GROUP:teamB"]);

        // '%' and '_' are not wildcards here
        assert!(store.keys_containing("proj%").unwrap().is_empty());
        assert_eq!(store.keys_containing("proj_").unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_expired() {
        let store = SqliteStore::in_memory().unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        store.set_with_expiry("old1", b"x", past).unwrap();
        store.set_with_expiry("old2", b"x", past).unwrap();
        store.set("fresh", b"x", Duration::from_secs(60)).unwrap();

        assert_eq!(store.cleanup_expired().unwrap(), 2);
        assert_eq!(store.len().unwrap(), 1);
        assert!(!store.is_empty().unwrap());
    }
}
