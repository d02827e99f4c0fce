//! Backend adapters.
//!
//! A [`BackendAdapter`] fetches live quota data from one storage system and
//! hands back normalized [`QuotaRecord`]s. The resolver only ever talks to
//! the trait, never to a concrete backend.

mod http;
mod onefs;
mod vast;

pub use http::{BackendHttp, HttpOptions};
pub use onefs::OneFsAdapter;
pub use vast::VastAdapter;

use crate::config::{BackendKind, IquotaConfig};
use crate::error::{IquotaError, Result};
use crate::models::{PrincipalKind, QuotaRecord, QuotaResponse, QuotaType};
use async_trait::async_trait;
use std::sync::Arc;

/// A single-entity lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaQuery {
    pub path: String,
    pub quota_type: QuotaType,
    /// User or group name; `None` for directory lookups.
    pub principal: Option<String>,
}

impl QuotaQuery {
    pub fn for_principal(path: impl Into<String>, kind: PrincipalKind, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            quota_type: kind.quota_type(),
            principal: Some(name.into()),
        }
    }

    pub fn user(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::for_principal(path, PrincipalKind::User, name)
    }

    pub fn group(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::for_principal(path, PrincipalKind::Group, name)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            quota_type: QuotaType::Directory,
            principal: None,
        }
    }

    /// Human-readable description for errors and logs.
    pub fn describe(&self) -> String {
        match &self.principal {
            Some(name) => format!("{} quota for {} on {}", self.quota_type, name, self.path),
            None => format!("{} quota on {}", self.quota_type, self.path),
        }
    }
}

/// Filter for paginated listings. `None` fields mean "all".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub path: Option<String>,
    pub quota_type: Option<QuotaType>,
}

impl ListQuery {
    pub fn new(path: Option<String>, quota_type: Option<QuotaType>) -> Self {
        Self { path, quota_type }
    }
}

/// Live quota source.
///
/// Adapters return `NotFound` when the backend confirms there is no quota
/// for the query and pass backend error codes through as `Backend`.
/// Transport failures (including timeouts) are never `NotFound`.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Short backend label (e.g. "onefs").
    fn name(&self) -> &'static str;

    /// Fetch the quota for one path/principal.
    async fn fetch(&self, query: &QuotaQuery) -> Result<QuotaResponse>;

    /// Fetch one page of a listing, continuing from `resume` when given.
    async fn fetch_page(&self, query: &ListQuery, resume: Option<&str>) -> Result<QuotaResponse>;

    /// Default-user and default-group records. May be empty.
    async fn fetch_defaults(&self) -> Result<Vec<QuotaRecord>>;
}

/// Shared adapter handle.
pub type DynBackendAdapter = Arc<dyn BackendAdapter>;

/// Build the adapter selected by `config.backend`.
pub fn build_adapter(config: &IquotaConfig) -> Result<DynBackendAdapter> {
    match config.backend {
        BackendKind::Onefs => {
            let onefs = config.onefs.as_ref().ok_or_else(|| IquotaError::Config {
                message: "missing [onefs] section".to_string(),
            })?;
            Ok(Arc::new(OneFsAdapter::new(onefs)?))
        }
        BackendKind::Vast => {
            let vast = config.vast.as_ref().ok_or_else(|| IquotaError::Config {
                message: "missing [vast] section".to_string(),
            })?;
            Ok(Arc::new(VastAdapter::new(vast)?))
        }
    }
}
