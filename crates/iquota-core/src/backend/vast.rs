//! VAST quota adapter. Directory quotas only.

use super::http::{BackendHttp, HttpOptions};
use super::{BackendAdapter, ListQuery, QuotaQuery};
use crate::config::VastConfig;
use crate::error::{IquotaError, Result};
use crate::models::{QuotaRecord, QuotaResponse, QuotaType};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct VastQuota {
    path: String,
    #[serde(default)]
    hard_limit: Option<u64>,
    #[serde(default)]
    hard_limit_inodes: Option<u64>,
    #[serde(default)]
    soft_limit: Option<u64>,
    #[serde(default)]
    soft_limit_inodes: Option<u64>,
    #[serde(default)]
    pretty_grace_period: Option<String>,
    #[serde(default)]
    used_effective_capacity: u64,
    #[serde(default)]
    used_inodes: u64,
}

fn normalize(quota: VastQuota) -> Result<QuotaRecord> {
    let soft = quota.soft_limit.unwrap_or(0);
    let mut record = QuotaRecord::directory(quota.path)
        .with_usage(quota.used_effective_capacity, quota.used_inodes)
        .with_byte_limits(soft, quota.hard_limit.unwrap_or(0))
        .with_inode_limits(
            quota.soft_limit_inodes.unwrap_or(0),
            quota.hard_limit_inodes.unwrap_or(0),
        );

    if let Some(grace) = quota
        .pretty_grace_period
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
    {
        record = record.with_grace_period(grace);
    }

    if soft > 0 && record.used_bytes >= soft {
        record = record.with_soft_exceeded(None);
    }

    record.validate()?;
    Ok(record)
}

fn parse_reply(status: StatusCode, body: &[u8]) -> Result<Vec<QuotaRecord>> {
    if !status.is_success() {
        return Err(IquotaError::backend(
            "AEC_SYSTEM",
            format!("Failed to fetch vast quota with HTTP status code: {}", status.as_u16()),
        ));
    }

    let quotas: Vec<VastQuota> = serde_json::from_slice(body)?;
    quotas.into_iter().map(normalize).collect()
}

/// Adapter for the VAST REST API.
pub struct VastAdapter {
    http: BackendHttp,
    base: Url,
}

impl VastAdapter {
    pub fn new(config: &VastConfig) -> Result<Self> {
        let base = Url::parse(&format!("https://{}/api/quotas/", config.host)).map_err(|e| {
            IquotaError::Config {
                message: format!("Invalid VAST host '{}': {}", config.host, e),
            }
        })?;

        let http = BackendHttp::new(HttpOptions {
            user: config.user.clone(),
            password: config.password.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            ca_cert: None,
            insecure_skip_verify: config.insecure_skip_verify,
        })?;

        Ok(Self { http, base })
    }

    fn url(&self, path: Option<&str>) -> Url {
        let mut url = self.base.clone();
        if let Some(path) = path {
            url.query_pairs_mut().append_pair("path", path);
        }
        url
    }

    async fn list(&self, path: Option<&str>) -> Result<Vec<QuotaRecord>> {
        let (status, body) = self.http.get(&self.url(path)).await?;
        parse_reply(status, &body)
    }
}

#[async_trait]
impl BackendAdapter for VastAdapter {
    fn name(&self) -> &'static str {
        "vast"
    }

    async fn fetch(&self, query: &QuotaQuery) -> Result<QuotaResponse> {
        if query.quota_type != QuotaType::Directory {
            return Err(IquotaError::backend(
                "AEC_UNSUPPORTED",
                format!("VAST only reports directory quotas, not {}", query.describe()),
            ));
        }

        let records = self.list(Some(&query.path)).await?;
        if records.is_empty() {
            return Err(IquotaError::not_found(query.describe()));
        }
        Ok(QuotaResponse::new(records))
    }

    async fn fetch_page(&self, query: &ListQuery, resume: Option<&str>) -> Result<QuotaResponse> {
        // Single page; there is never anything to resume.
        if resume.is_some() {
            return Ok(QuotaResponse::default());
        }

        match query.quota_type {
            None | Some(QuotaType::Directory) => {}
            Some(_) => return Ok(QuotaResponse::default()),
        }

        let records = self.list(query.path.as_deref()).await?;
        debug!("VAST listing returned {} quotas", records.len());
        Ok(QuotaResponse::new(records))
    }

    async fn fetch_defaults(&self) -> Result<Vec<QuotaRecord>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"[{
        "cluster": "",
        "grace_period": "7 00:00:00",
        "hard_limit": 11000000000,
        "hard_limit_inodes": 10100000,
        "id": 1441,
        "path": "/projects/lab",
        "pretty_grace_period": " 7 days",
        "pretty_state": "OK",
        "soft_limit": 10000000000,
        "soft_limit_inodes": 10000000,
        "state": "OK",
        "used_capacity": 1038804300,
        "used_effective_capacity": 1043824640,
        "used_inodes": 282
    }]"#;

    fn adapter() -> VastAdapter {
        VastAdapter::new(&VastConfig {
            host: "vast-mgt.example.edu".to_string(),
            ..VastConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_reply() {
        let records = parse_reply(StatusCode::OK, REPLY.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.quota_type, QuotaType::Directory);
        assert_eq!(record.path, "/projects/lab");
        assert_eq!(record.used_bytes, 1_043_824_640);
        assert_eq!(record.used_inodes, 282);
        assert_eq!(record.soft_limit_bytes, 10_000_000_000);
        assert_eq!(record.hard_limit_inodes, 10_100_000);
        assert_eq!(record.grace_period.as_deref(), Some("7 days"));
        assert!(!record.soft_exceeded);
    }

    #[test]
    fn test_usage_at_soft_limit_is_exceeded() {
        let body = r#"[{"path": "/projects/full", "soft_limit": 100, "hard_limit": 200, "used_effective_capacity": 150}]"#;
        let records = parse_reply(StatusCode::OK, body.as_bytes()).unwrap();
        assert!(records[0].soft_exceeded);
        assert!(records[0].is_over_quota());
    }

    #[test]
    fn test_http_failure() {
        let err = parse_reply(StatusCode::FORBIDDEN, b"").unwrap_err();
        assert_eq!(err.error_code(), "AEC_SYSTEM");
    }

    #[tokio::test]
    async fn test_principal_lookup_unsupported() {
        let err = adapter()
            .fetch(&QuotaQuery::user("/projects/lab", "alice"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "AEC_UNSUPPORTED");
    }

    #[tokio::test]
    async fn test_resume_yields_empty_page() {
        let page = adapter()
            .fetch_page(&ListQuery::default(), Some("anything"))
            .await
            .unwrap();
        assert!(page.is_empty());
        assert_eq!(page.resume, None);
    }

    #[test]
    fn test_url_carries_path() {
        let url = adapter().url(Some("/projects/lab"));
        assert_eq!(url.path(), "/api/quotas/");
        assert_eq!(url.query(), Some("path=%2Fprojects%2Flab"));
        assert_eq!(adapter().url(None).query(), None);
    }
}
