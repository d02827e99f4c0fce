//! Typed quota cache over a [`KeyValueStore`].

use super::keys::{is_negative_key, CacheKey};
use super::traits::KeyValueStore;
use crate::error::{IquotaError, Result};
use crate::models::{CachedValue, QuotaRecord, QuotaResponse};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Empty JSON object stored under negative keys.
const NEGATIVE_VALUE: &[u8] = b"{}";

/// Result of a best-effort cache scan.
///
/// Entries that could not be decoded, or that expired between listing and
/// reading, are left out of `records` and counted in `skipped`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub records: Vec<QuotaRecord>,
    pub skipped: usize,
}

/// Quota-aware cache: key naming, JSON encoding and negative entries.
#[derive(Clone)]
pub struct QuotaCache {
    store: Arc<dyn KeyValueStore>,
    home_dir: String,
}

impl QuotaCache {
    /// `home_dir` is excluded from pattern scans.
    pub fn new(store: Arc<dyn KeyValueStore>, home_dir: impl Into<String>) -> Self {
        Self {
            store,
            home_dir: home_dir.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn home_dir(&self) -> &str {
        &self.home_dir
    }

    fn get_value(&self, key: &CacheKey) -> Result<CachedValue> {
        let raw_key = key.positive();
        let raw = self
            .store
            .get(&raw_key)?
            .ok_or_else(|| IquotaError::not_found(raw_key.clone()))?;

        // A corrupt positive entry reads as a miss so the next fetch overwrites it.
        serde_json::from_slice(&raw).map_err(|e| {
            warn!("Discarding undecodable cache entry {}: {}", raw_key, e);
            IquotaError::not_found(raw_key)
        })
    }

    /// Cached response for `key`, or `NotFound`.
    pub fn get_response(&self, key: &CacheKey) -> Result<QuotaResponse> {
        match self.get_value(key)? {
            CachedValue::Response(response) => Ok(response),
            CachedValue::Record(record) => Ok(QuotaResponse::new(vec![*record])),
        }
    }

    /// Cached single record for `key`, or `NotFound`.
    pub fn get_record(&self, key: &CacheKey) -> Result<QuotaRecord> {
        self.get_value(key)?
            .into_records()
            .into_iter()
            .next()
            .ok_or_else(|| IquotaError::not_found(key.positive()))
    }

    /// Store a positive entry. For principal keys this also drops the
    /// matching negative marker.
    pub fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_vec(value)?;
        self.store.set(&key.positive(), &raw, ttl)?;

        if let Some(negative) = key.negative() {
            if self.store.delete(&negative)? {
                debug!("Positive write for {} superseded negative entry", key);
            }
        }

        Ok(())
    }

    /// Remember that `key` has no quota.
    pub fn set_negative(&self, key: &CacheKey, ttl: Duration) -> Result<()> {
        match key.negative() {
            Some(negative) => self.store.set(&negative, NEGATIVE_VALUE, ttl),
            None => Err(IquotaError::Validation {
                field: "key".to_string(),
                message: format!("directory key {} has no negative form", key),
            }),
        }
    }

    pub fn is_negative(&self, key: &CacheKey) -> Result<bool> {
        match key.negative() {
            Some(negative) => Ok(self.store.get(&negative)?.is_some()),
            None => Ok(false),
        }
    }

    /// Records under keys containing `pattern`, excluding the home tree.
    pub fn find_by_pattern(&self, pattern: &str) -> Result<ScanReport> {
        let keys = self
            .store
            .keys_containing(pattern)?
            .into_iter()
            .filter(|key| !key.starts_with(&self.home_dir))
            .collect::<Vec<_>>();

        self.collect(keys)
    }

    /// Records under keys starting with `prefix`, optionally limited to keys
    /// whose lowercase form contains `type_filter`.
    pub fn scan_prefix(&self, prefix: &str, type_filter: Option<&str>) -> Result<ScanReport> {
        let type_filter = type_filter.map(str::to_lowercase);

        let keys = self
            .store
            .keys_containing(prefix)?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| match &type_filter {
                Some(filter) => key.to_lowercase().contains(filter.as_str()),
                None => true,
            })
            .collect::<Vec<_>>();

        self.collect(keys)
    }

    fn collect(&self, keys: Vec<String>) -> Result<ScanReport> {
        let mut report = ScanReport::default();

        for key in keys.iter().filter(|key| !is_negative_key(key)) {
            let Some(raw) = self.store.get(key)? else {
                report.skipped += 1;
                continue;
            };

            match serde_json::from_slice::<CachedValue>(&raw) {
                Ok(value) => report.records.extend(value.into_records()),
                Err(e) => {
                    warn!("Skipping undecodable cache entry {}: {}", key, e);
                    report.skipped += 1;
                }
            }
        }

        debug!(
            "Cache scan over {} keys: {} records, {} skipped",
            keys.len(),
            report.records.len(),
            report.skipped
        );

        Ok(report)
    }
}
