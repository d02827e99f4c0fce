//! Bulk directory-quota refresh.
//!
//! Walks an adapter's directory listing and writes each record under its
//! bare path key, so pattern and directory lookups can be served from cache.

use crate::backend::{BackendAdapter, ListQuery};
use crate::cache::{CacheKey, QuotaCache};
use crate::error::{IquotaError, Result};
use crate::models::QuotaType;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

/// Tracks resume tokens across one paginated listing.
///
/// A token seen before means the backend is cycling; that is a backend
/// error rather than an endless listing.
#[derive(Debug, Default)]
pub(crate) struct ResumeTokens {
    seen: HashSet<String>,
}

impl ResumeTokens {
    /// Accept the token a page returned. `Ok(None)` ends the listing.
    pub(crate) fn advance(&mut self, backend: &str, token: Option<String>) -> Result<Option<String>> {
        match token {
            None => Ok(None),
            Some(next) if !self.seen.insert(next.clone()) => Err(IquotaError::backend(
                "AEC_SYSTEM",
                format!("{} repeated resume token '{}'", backend, next),
            )),
            Some(next) => Ok(Some(next)),
        }
    }
}

/// Outcome of a bulk refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub cached: usize,
    pub failed: usize,
}

/// Page through every directory quota and cache it for `ttl`.
///
/// Individual write failures are counted, not fatal. Adapter errors and a
/// repeated resume token abort.
pub async fn refresh_directory_cache(
    adapter: &dyn BackendAdapter,
    cache: &QuotaCache,
    ttl: Duration,
) -> Result<RefreshReport> {
    let query = ListQuery::new(None, Some(QuotaType::Directory));
    let mut report = RefreshReport::default();
    let mut resume: Option<String> = None;
    let mut tokens = ResumeTokens::default();

    loop {
        let page = adapter.fetch_page(&query, resume.as_deref()).await?;

        for record in page.quotas.iter().filter(|r| r.quota_type == QuotaType::Directory) {
            match cache.set(&CacheKey::directory(record.path.as_str()), record, ttl) {
                Ok(()) => report.cached += 1,
                Err(e) => {
                    warn!("Failed to cache directory quota {}: {}", record.path, e);
                    report.failed += 1;
                }
            }
        }

        resume = tokens.advance(adapter.name(), page.resume)?;
        if resume.is_none() {
            break;
        }
    }

    info!(
        "Directory refresh from {}: {} cached, {} failed",
        adapter.name(),
        report.cached,
        report.failed
    );
    Ok(report)
}
