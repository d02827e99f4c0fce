//! OneFS SmartQuotas adapter.

use super::http::{BackendHttp, HttpOptions};
use super::{BackendAdapter, ListQuery, QuotaQuery};
use crate::config::OneFsConfig;
use crate::error::{IquotaError, Result};
use crate::models::{Principal, PrincipalKind, QuotaRecord, QuotaResponse, QuotaType};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const RESOURCE_QUOTAS: &str = "/platform/1/quota/quotas";
const CODE_NOT_FOUND: &str = "AEC_NOT_FOUND";

#[derive(Debug, Deserialize)]
struct OneFsError {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct OneFsPersona {
    /// Serialized form, e.g. `UID:1000` or `GID:100`.
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OneFsThresholds {
    #[serde(default)]
    soft: Option<u64>,
    #[serde(default)]
    hard: Option<u64>,
    #[serde(default)]
    soft_exceeded: bool,
    #[serde(default)]
    soft_grace: Option<u64>,
    #[serde(default)]
    soft_last_exceeded: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct OneFsUsage {
    #[serde(default)]
    inodes: u64,
    #[serde(default)]
    logical: u64,
}

#[derive(Debug, Deserialize)]
struct OneFsQuota {
    path: String,
    #[serde(rename = "type")]
    quota_type: String,
    #[serde(default)]
    persona: Option<OneFsPersona>,
    #[serde(default)]
    thresholds: Option<OneFsThresholds>,
    #[serde(default)]
    usage: Option<OneFsUsage>,
}

#[derive(Debug, Deserialize)]
struct OneFsEnvelope {
    #[serde(default)]
    errors: Option<Vec<OneFsError>>,
    #[serde(default)]
    quotas: Option<Vec<OneFsQuota>>,
    #[serde(default)]
    resume: Option<String>,
}

/// Render a grace period in seconds the way the quota reports show it.
pub(crate) fn format_grace_period(secs: u64) -> Option<String> {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let (amount, unit) = match secs {
        0 => return None,
        s if s % DAY == 0 => (s / DAY, "day"),
        s if s % HOUR == 0 => (s / HOUR, "hour"),
        s if s % MINUTE == 0 => (s / MINUTE, "minute"),
        s => (s, "second"),
    };

    Some(format!("{} {}{}", amount, unit, if amount == 1 { "" } else { "s" }))
}

/// Numeric part of a serialized persona id (`UID:1000` → 1000).
fn persona_id(id: &str) -> Option<u32> {
    let (kind, number) = id.split_once(':')?;
    match kind {
        "UID" | "GID" => number.parse().ok(),
        _ => None,
    }
}

fn normalize(quota: OneFsQuota) -> Result<QuotaRecord> {
    let quota_type: QuotaType = quota.quota_type.parse()?;
    let thresholds = quota.thresholds.unwrap_or_default();
    let usage = quota.usage.unwrap_or_default();

    let principal = if quota_type.has_principal() {
        let persona = quota.persona.unwrap_or_default();
        let id = persona.id.as_deref().and_then(persona_id);
        let name = persona
            .name
            .filter(|n| !n.is_empty())
            .or(persona.id)
            .ok_or_else(|| IquotaError::Validation {
                field: "persona".to_string(),
                message: format!("{} quota on {} has no persona", quota_type, quota.path),
            })?;
        Some(Principal { name, id })
    } else {
        None
    };

    let mut record = QuotaRecord {
        path: quota.path,
        quota_type,
        principal,
        used_bytes: usage.logical,
        used_inodes: usage.inodes,
        soft_limit_bytes: thresholds.soft.unwrap_or(0),
        hard_limit_bytes: thresholds.hard.unwrap_or(0),
        soft_limit_inodes: 0,
        hard_limit_inodes: 0,
        grace_period: thresholds.soft_grace.and_then(format_grace_period),
        soft_exceeded: false,
        soft_last_exceeded_at: None,
    };

    if thresholds.soft_exceeded {
        let at = thresholds
            .soft_last_exceeded
            .filter(|secs| *secs > 0)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        record = record.with_soft_exceeded(at);
    }

    record.validate()?;
    Ok(record)
}

/// Decode one OneFS API reply.
fn parse_reply(status: StatusCode, body: &[u8], what: &str) -> Result<QuotaResponse> {
    if status.is_server_error() {
        return Err(IquotaError::backend(
            "AEC_SYSTEM",
            format!("Failed to fetch {} with HTTP status code: {}", what, status.as_u16()),
        ));
    }

    let envelope: OneFsEnvelope = serde_json::from_slice(body)?;

    if let Some(error) = envelope.errors.and_then(|errors| errors.into_iter().next()) {
        return Err(if error.code == CODE_NOT_FOUND {
            IquotaError::not_found(what)
        } else {
            IquotaError::backend(error.code, error.message)
        });
    }

    let quotas = envelope
        .quotas
        .unwrap_or_default()
        .into_iter()
        .map(normalize)
        .collect::<Result<Vec<_>>>()?;

    Ok(QuotaResponse::page(quotas, envelope.resume.unwrap_or_default()))
}

/// Adapter for the OneFS platform API.
pub struct OneFsAdapter {
    http: BackendHttp,
    base: Url,
}

impl OneFsAdapter {
    pub fn new(config: &OneFsConfig) -> Result<Self> {
        let base = Url::parse(&format!("https://{}:{}{}", config.host, config.port, RESOURCE_QUOTAS))
            .map_err(|e| IquotaError::Config {
                message: format!("Invalid OneFS host '{}': {}", config.host, e),
            })?;

        let http = BackendHttp::new(HttpOptions {
            user: config.user.clone(),
            password: config.password.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            ca_cert: config.ca_cert.clone(),
            insecure_skip_verify: config.insecure_skip_verify,
        })?;

        Ok(Self { http, base })
    }

    fn query_url(&self, query: &QuotaQuery) -> Url {
        let mut url = self.base.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("path", &query.path);
            params.append_pair("type", query.quota_type.as_str());
            if let Some(name) = &query.principal {
                let kind = match query.quota_type {
                    QuotaType::Group => PrincipalKind::Group,
                    _ => PrincipalKind::User,
                };
                params.append_pair("persona", &format!("{}:{}", kind.key_label(), name));
            }
            params.append_pair("resolve_names", "true");
        }
        url
    }

    fn list_url(&self, query: &ListQuery, resume: Option<&str>) -> Url {
        let mut url = self.base.clone();
        {
            let mut params = url.query_pairs_mut();
            // A resume token cannot be combined with other filters.
            if let Some(token) = resume {
                params.append_pair("resume", token);
            } else {
                if let Some(path) = &query.path {
                    params.append_pair("path", path);
                }
                if let Some(quota_type) = query.quota_type {
                    params.append_pair("type", quota_type.as_str());
                }
                params.append_pair("resolve_names", "true");
            }
        }
        url
    }
}

#[async_trait]
impl BackendAdapter for OneFsAdapter {
    fn name(&self) -> &'static str {
        "onefs"
    }

    async fn fetch(&self, query: &QuotaQuery) -> Result<QuotaResponse> {
        let (status, body) = self.http.get(&self.query_url(query)).await?;
        parse_reply(status, &body, &query.describe())
    }

    async fn fetch_page(&self, query: &ListQuery, resume: Option<&str>) -> Result<QuotaResponse> {
        let (status, body) = self.http.get(&self.list_url(query, resume)).await?;
        let response = parse_reply(status, &body, "quota listing")?;
        debug!(
            "OneFS page: {} quotas, more: {}",
            response.quotas.len(),
            response.resume.is_some()
        );
        Ok(response)
    }

    async fn fetch_defaults(&self) -> Result<Vec<QuotaRecord>> {
        let mut defaults = Vec::new();

        for quota_type in [QuotaType::DefaultUser, QuotaType::DefaultGroup] {
            let query = ListQuery::new(None, Some(quota_type));
            let mut resume: Option<String> = None;
            loop {
                let page = self.fetch_page(&query, resume.as_deref()).await?;
                defaults.extend(page.quotas);
                match page.resume {
                    Some(next) if resume.as_deref() != Some(next.as_str()) => resume = Some(next),
                    _ => break,
                }
            }
        }

        info!("Fetched {} default quotas from OneFS", defaults.len());
        Ok(defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER_REPLY: &str = r#"{
        "quotas": [{
            "container": true,
            "enforced": true,
            "id": "abc123",
            "path": "/ifs/home",
            "type": "user",
            "persona": {"id": "UID:1045", "name": "alice", "type": "user"},
            "thresholds": {
                "advisory": null,
                "hard": 10000000000,
                "soft": 9000000000,
                "soft_exceeded": true,
                "soft_grace": 604800,
                "soft_last_exceeded": 1700000000
            },
            "usage": {"inodes": 4521, "logical": 9500000000, "physical": 9900000000}
        }],
        "resume": null
    }"#;

    fn config() -> OneFsConfig {
        OneFsConfig {
            host: "isilon.example.edu".to_string(),
            user: "iquota".to_string(),
            password: "secret".to_string(),
            ..OneFsConfig::default()
        }
    }

    #[test]
    fn test_parse_user_reply() {
        let response = parse_reply(StatusCode::OK, USER_REPLY.as_bytes(), "user quota").unwrap();
        assert_eq!(response.resume, None);
        assert_eq!(response.quotas.len(), 1);

        let record = &response.quotas[0];
        assert_eq!(record.quota_type, QuotaType::User);
        assert_eq!(record.principal_name(), Some("alice"));
        assert_eq!(record.principal.as_ref().unwrap().id, Some(1045));
        assert_eq!(record.used_bytes, 9_500_000_000);
        assert_eq!(record.used_inodes, 4521);
        assert_eq!(record.hard_limit_bytes, 10_000_000_000);
        assert_eq!(record.grace_period.as_deref(), Some("7 days"));
        assert!(record.soft_exceeded);
        assert_eq!(record.soft_last_exceeded_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_timestamp_dropped_when_not_exceeded() {
        let body = r#"{"quotas": [{
            "path": "/ifs/projects/x", "type": "directory",
            "thresholds": {"hard": 100, "soft": 50, "soft_exceeded": false, "soft_last_exceeded": 1700000000},
            "usage": {"inodes": 1, "logical": 10}
        }]}"#;
        let response = parse_reply(StatusCode::OK, body.as_bytes(), "directory quota").unwrap();
        assert!(!response.quotas[0].soft_exceeded);
        assert_eq!(response.quotas[0].soft_last_exceeded_at, None);
    }

    #[test]
    fn test_not_found_error() {
        let body = r#"{"errors": [{"code": "AEC_NOT_FOUND", "message": "Quota not found"}]}"#;
        let err = parse_reply(StatusCode::NOT_FOUND, body.as_bytes(), "user quota").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_other_errors_pass_through() {
        let body = r#"{"errors": [
            {"code": "AEC_UNAUTHORIZED", "message": "Authorization required"},
            {"code": "AEC_SECOND", "message": "ignored"}
        ]}"#;
        let err = parse_reply(StatusCode::UNAUTHORIZED, body.as_bytes(), "user quota").unwrap_err();
        match err {
            IquotaError::Backend { code, message } => {
                assert_eq!(code, "AEC_UNAUTHORIZED");
                assert_eq!(message, "Authorization required");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_server_error_status() {
        let err = parse_reply(StatusCode::INTERNAL_SERVER_ERROR, b"oops", "user quota").unwrap_err();
        assert_eq!(err.error_code(), "AEC_SYSTEM");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_resume_token_kept() {
        let body = r#"{"quotas": [], "resume": "tok1"}"#;
        let response = parse_reply(StatusCode::OK, body.as_bytes(), "listing").unwrap();
        assert_eq!(response.resume.as_deref(), Some("tok1"));

        let body = r#"{"quotas": [], "resume": ""}"#;
        let response = parse_reply(StatusCode::OK, body.as_bytes(), "listing").unwrap();
        assert_eq!(response.resume, None);
    }

    #[test]
    fn test_format_grace_period() {
        assert_eq!(format_grace_period(0), None);
        assert_eq!(format_grace_period(86_400).as_deref(), Some("1 day"));
        assert_eq!(format_grace_period(7_200).as_deref(), Some("2 hours"));
        assert_eq!(format_grace_period(90).as_deref(), Some("90 seconds"));
    }

    #[test]
    fn test_persona_id() {
        assert_eq!(persona_id("UID:1045"), Some(1045));
        assert_eq!(persona_id("GID:100"), Some(100));
        assert_eq!(persona_id("SID:S-1-1"), None);
        assert_eq!(persona_id("garbage"), None);
    }

    #[test]
    fn test_query_url() {
        let adapter = OneFsAdapter::new(&config()).unwrap();
        let url = adapter.query_url(&QuotaQuery::group("/ifs/projects", "genomics"));
        assert_eq!(url.path(), RESOURCE_QUOTAS);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("type".to_string(), "group".to_string())));
        assert!(pairs.contains(&("persona".to_string(), "GROUP:genomics".to_string())));
        assert!(pairs.contains(&("resolve_names".to_string(), "true".to_string())));
    }

    #[test]
    fn test_list_url_resume_only() {
        let adapter = OneFsAdapter::new(&config()).unwrap();
        let query = ListQuery::new(Some("/ifs".to_string()), Some(QuotaType::User));

        let first = adapter.list_url(&query, None);
        assert!(first.query().unwrap().contains("path=%2Fifs"));

        let next = adapter.list_url(&query, Some("tok1"));
        assert_eq!(next.query(), Some("resume=tok1"));
    }
}
