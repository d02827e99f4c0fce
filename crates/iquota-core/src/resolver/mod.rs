//! Cache-aside quota resolver.
//!
//! Single-entity lookups consult the negative and positive cache before the
//! backend and write results back. Pattern lookups are cache-only.
//! Exhaustive listings page through the backend and then union in entries
//! the cache holds for backends that can only be reached through it.
//!
//! A negative entry is trusted until it expires, even if a quota was created
//! in the meantime; `neg_cache_expire` bounds that window. Only a positive
//! write for the same key clears it early.

mod defaults;
mod refresh;

pub use defaults::DefaultQuotaTable;
pub use refresh::{refresh_directory_cache, RefreshReport};

use refresh::ResumeTokens;

use crate::access::{AccessPolicy, Caller};
use crate::backend::{DynBackendAdapter, ListQuery, QuotaQuery};
use crate::cache::{CacheKey, KeyValueStore, QuotaCache, ScanReport};
use crate::config::{IquotaConfig, StoreErrorPolicy};
use crate::error::{IquotaError, Result};
use crate::models::{PrincipalKind, QuotaRecord, QuotaResponse, QuotaType};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Routing prefix front ends put on group search patterns.
pub const GROUP_PATTERN_PREFIX: &str = "grp-";

/// When and how long to cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl: Duration,
    pub negative_ttl: Duration,
    pub store_error_policy: StoreErrorPolicy,
}

impl CachePolicy {
    pub fn from_config(config: &IquotaConfig) -> Self {
        Self {
            enabled: config.enable_cache,
            ttl: config.cache_ttl(),
            negative_ttl: config.negative_ttl(),
            store_error_policy: config.store_error_policy,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::from_config(&IquotaConfig::default())
        }
    }
}

/// Answers quota questions for callers.
pub struct Resolver {
    adapter: DynBackendAdapter,
    cache: QuotaCache,
    policy: CachePolicy,
    access: AccessPolicy,
    defaults: RwLock<Arc<DefaultQuotaTable>>,
    cache_only_prefix: Option<String>,
}

impl Resolver {
    pub fn new(
        adapter: DynBackendAdapter,
        cache: QuotaCache,
        policy: CachePolicy,
        access: AccessPolicy,
        defaults: DefaultQuotaTable,
    ) -> Self {
        Self {
            adapter,
            cache,
            policy,
            access,
            defaults: RwLock::new(Arc::new(defaults)),
            cache_only_prefix: None,
        }
    }

    /// Wire a resolver from configuration with an empty default table.
    pub fn from_config(
        config: &IquotaConfig,
        adapter: DynBackendAdapter,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let resolver = Self::new(
            adapter,
            QuotaCache::new(store, config.home_dir.clone()),
            CachePolicy::from_config(config),
            AccessPolicy::new(config.admins.iter().cloned()),
            DefaultQuotaTable::empty(),
        );
        match &config.cache_only_prefix {
            Some(prefix) => resolver.with_cache_only_prefix(prefix.clone()),
            None => resolver,
        }
    }

    /// Union cache entries under `prefix` into exhaustive listings.
    pub fn with_cache_only_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_only_prefix = Some(prefix.into());
        self
    }

    pub fn cache(&self) -> &QuotaCache {
        &self.cache
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn access(&self) -> &AccessPolicy {
        &self.access
    }

    pub fn backend_name(&self) -> &'static str {
        self.adapter.name()
    }

    /// Apply the store error policy. `Ok` means carry on without the cache.
    fn store_failure(&self, err: IquotaError, during: &str) -> Result<()> {
        match self.policy.store_error_policy {
            StoreErrorPolicy::Bypass => {
                warn!("Cache store failed during {}, bypassing cache: {}", during, err);
                Ok(())
            }
            StoreErrorPolicy::Fail => {
                error!("Cache store failed during {}: {}", during, err);
                Err(err)
            }
        }
    }

    /// Cache-aside lookup for one principal. No access check.
    pub async fn resolve(&self, path: &str, kind: PrincipalKind, name: &str) -> Result<QuotaResponse> {
        let key = CacheKey::principal(path, kind, name);
        let mut use_cache = self.policy.enabled;

        if use_cache {
            match self.cache.is_negative(&key) {
                Ok(true) => {
                    debug!("Negative cache hit for {}", key);
                    return Err(IquotaError::not_found(key.positive()));
                }
                Ok(false) => {}
                Err(e) => {
                    self.store_failure(e, "negative lookup")?;
                    use_cache = false;
                }
            }
        }

        if use_cache {
            match self.cache.get_response(&key) {
                Ok(response) => {
                    debug!("Cache hit for {}", key);
                    return Ok(response);
                }
                Err(e) if e.is_not_found() => debug!("Cache miss for {}", key),
                Err(e) => {
                    self.store_failure(e, "cache lookup")?;
                    use_cache = false;
                }
            }
        }

        let query = QuotaQuery::for_principal(path, kind, name);
        info!("Fetching {} from {}", query.describe(), self.adapter.name());

        match self.adapter.fetch(&query).await {
            Ok(response) => {
                if use_cache {
                    if let Err(e) = self.cache.set(&key, &response, self.policy.ttl) {
                        self.store_failure(e, "cache write")?;
                    }
                }
                Ok(response)
            }
            Err(e) if e.is_not_found() => {
                if use_cache {
                    if let Err(store_err) = self.cache.set_negative(&key, self.policy.negative_ttl) {
                        self.store_failure(store_err, "negative cache write")?;
                    }
                }
                Err(e)
            }
            Err(e) => {
                error!("Failed to fetch {}: {}", query.describe(), e);
                Err(e)
            }
        }
    }

    async fn attach_default(&self, path: &str, kind: PrincipalKind, response: QuotaResponse) -> QuotaResponse {
        let table = self.defaults.read().await.clone();
        let default = table.get(path, kind).cloned();
        QuotaResponse {
            resume: None,
            ..response.with_default(default)
        }
    }

    /// User quota on `path` for `user`, defaulting to the caller.
    pub async fn user_quota(&self, caller: &Caller, path: &str, user: Option<&str>) -> Result<QuotaResponse> {
        require_path(path)?;
        let target = user.filter(|u| !u.is_empty()).unwrap_or(caller.uid.as_str());
        self.access.authorize(caller, target, PrincipalKind::User)?;

        let response = self.resolve(path, PrincipalKind::User, target).await?;
        Ok(self.attach_default(path, PrincipalKind::User, response).await)
    }

    /// Group quotas on `path`.
    ///
    /// Without an explicit group every group the caller belongs to is looked
    /// up concurrently; groups with no quota are skipped and results keep the
    /// caller's group order. An explicit group must be one of the caller's
    /// groups unless the caller is an admin, and its absence is an error.
    pub async fn group_quota(&self, caller: &Caller, path: &str, group: Option<&str>) -> Result<QuotaResponse> {
        require_path(path)?;

        let explicit = group.filter(|g| !g.is_empty());
        let groups: Vec<String> = match explicit {
            Some(group) => {
                self.access.authorize(caller, group, PrincipalKind::Group)?;
                vec![group.to_string()]
            }
            None => caller.groups.clone(),
        };

        let groups: Vec<String> = groups
            .iter()
            .map(|g| g.replace(' ', ""))
            .filter(|g| !g.is_empty())
            .collect();
        debug!("Resolving group quotas for {} on {}: {:?}", caller.uid, path, groups);

        let lookups = groups
            .iter()
            .map(|group| self.resolve(path, PrincipalKind::Group, group));
        let results = join_all(lookups).await;

        let mut quotas = Vec::new();
        for (group, result) in groups.iter().zip(results) {
            match result {
                Ok(response) => quotas.extend(response.quotas),
                Err(e) if e.is_not_found() && explicit.is_none() => {
                    debug!("No quota for group {} on {}", group, path);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(self
            .attach_default(path, PrincipalKind::Group, QuotaResponse::new(quotas))
            .await)
    }

    /// Directory quota for `path`, cached under the bare path.
    ///
    /// Absence is not cached.
    pub async fn directory_quota(&self, path: &str) -> Result<QuotaResponse> {
        require_path(path)?;
        let key = CacheKey::directory(path);
        let mut use_cache = self.policy.enabled;

        if use_cache {
            match self.cache.get_response(&key) {
                Ok(response) => {
                    debug!("Cache hit for directory {}", path);
                    return Ok(response);
                }
                Err(e) if e.is_not_found() => debug!("Cache miss for directory {}", path),
                Err(e) => {
                    self.store_failure(e, "directory lookup")?;
                    use_cache = false;
                }
            }
        }

        let query = QuotaQuery::directory(path);
        let response = self.adapter.fetch(&query).await.map_err(|e| {
            if !e.is_not_found() {
                error!("Failed to fetch {}: {}", query.describe(), e);
            }
            e
        })?;

        if use_cache {
            if let Err(e) = self.cache.set(&key, &response, self.policy.ttl) {
                self.store_failure(e, "directory cache write")?;
            }
        }

        Ok(response)
    }

    /// Every quota the backend lists, then matching cache-only entries.
    ///
    /// Records present in both sources appear twice.
    async fn exhaustive(&self, query: &ListQuery) -> Result<Vec<QuotaRecord>> {
        let mut quotas = Vec::new();
        let mut resume: Option<String> = None;
        let mut pages = 0usize;
        let mut tokens = ResumeTokens::default();

        loop {
            let page = self.adapter.fetch_page(query, resume.as_deref()).await?;
            pages += 1;
            quotas.extend(page.quotas);

            resume = tokens.advance(self.adapter.name(), page.resume)?;
            if resume.is_none() {
                break;
            }
        }
        debug!("Fetched {} quotas in {} pages", quotas.len(), pages);

        if let (true, Some(prefix)) = (self.policy.enabled, &self.cache_only_prefix) {
            let type_filter = query.quota_type.map(|t| t.as_str());
            match self.cache.scan_prefix(prefix, type_filter) {
                Ok(ScanReport { records, skipped }) => {
                    let before = quotas.len();
                    quotas.extend(records.into_iter().filter(|r| match &query.path {
                        Some(path) => r.path.starts_with(path.as_str()),
                        None => true,
                    }));
                    info!(
                        "Found {} quotas from cache under {} ({} skipped)",
                        quotas.len() - before,
                        prefix,
                        skipped
                    );
                }
                Err(e) => self.store_failure(e, "cache union")?,
            }
        }

        Ok(quotas)
    }

    /// Admin-only exhaustive listing, optionally filtered by path and type.
    pub async fn list_all(
        &self,
        caller: &Caller,
        path: Option<&str>,
        quota_type: Option<QuotaType>,
    ) -> Result<QuotaResponse> {
        self.access.require_admin(caller, "listing all quotas")?;
        let query = ListQuery::new(path.filter(|p| !p.is_empty()).map(str::to_string), quota_type);
        Ok(QuotaResponse::new(self.exhaustive(&query).await?))
    }

    /// Admin-only listing of quotas past their soft limit or at their hard limit.
    pub async fn over_quota(&self, caller: &Caller, path: Option<&str>) -> Result<QuotaResponse> {
        self.access.require_admin(caller, "listing over-quota entries")?;
        let query = ListQuery::new(path.filter(|p| !p.is_empty()).map(str::to_string), None);
        let quotas = self
            .exhaustive(&query)
            .await?
            .into_iter()
            .filter(QuotaRecord::is_over_quota)
            .collect();
        Ok(QuotaResponse::new(quotas))
    }

    /// Admin-only pattern lookup, served from cache alone.
    pub async fn search(&self, caller: &Caller, pattern: &str) -> Result<ScanReport> {
        self.access.require_admin(caller, "pattern search")?;

        let pattern = pattern.strip_prefix(GROUP_PATTERN_PREFIX).unwrap_or(pattern);
        if pattern.is_empty() {
            return Err(IquotaError::Validation {
                field: "pattern".to_string(),
                message: "pattern is required".to_string(),
            });
        }

        let report = self.cache.find_by_pattern(pattern)?;
        if report.skipped > 0 {
            warn!("Pattern search '{}' skipped {} cache entries", pattern, report.skipped);
        }
        Ok(report)
    }

    /// Current default-user and default-group records.
    pub async fn default_quotas(&self) -> Vec<QuotaRecord> {
        self.defaults.read().await.records()
    }

    /// Rebuild the default table from the backend and swap it in.
    ///
    /// On failure the old table stays in place.
    pub async fn reload_defaults(&self) -> Result<usize> {
        let records = self.adapter.fetch_defaults().await?;
        let table = DefaultQuotaTable::from_records(records);
        let count = table.len();
        *self.defaults.write().await = Arc::new(table);
        info!("Loaded {} default quotas from {}", count, self.adapter.name());
        Ok(count)
    }

    /// Bulk-refresh directory quotas into the cache with the positive TTL.
    pub async fn refresh_directories(&self) -> Result<RefreshReport> {
        refresh_directory_cache(self.adapter.as_ref(), &self.cache, self.policy.ttl).await
    }
}

fn require_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(IquotaError::Validation {
            field: "path".to_string(),
            message: "Path is required".to_string(),
        });
    }
    Ok(())
}
