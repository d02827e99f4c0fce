//! Request handlers.
//!
//! Identity comes from the fronting proxy: `X-Remote-User` carries the
//! authenticated user name and `X-Remote-Groups` a comma-separated group list.

use crate::server::AppState;
use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use iquota::{Caller, IquotaError, QuotaRecord, QuotaResponse, QuotaType};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub const REMOTE_USER_HEADER: &str = "x-remote-user";
pub const REMOTE_GROUPS_HEADER: &str = "x-remote-groups";

/// Error rendered as `{"code": ..., "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    fn unauthenticated() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "AEC_UNAUTHENTICATED".to_string(),
            message: "No authenticated user".to_string(),
        }
    }
}

impl From<IquotaError> for ApiError {
    fn from(err: IquotaError) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("Request failed: {}", err);
        } else {
            debug!("Request rejected: {}", err);
        }
        Self {
            status,
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "code": self.code,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Caller identity taken from proxy headers.
pub struct RemoteCaller(pub Caller);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RemoteCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let uid = parts
            .headers
            .get(REMOTE_USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(ApiError::unauthenticated)?;

        let groups = parts
            .headers
            .get(REMOTE_GROUPS_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(parse_groups)
            .unwrap_or_default();

        Ok(RemoteCaller(Caller::new(uid, groups)))
    }
}

fn parse_groups(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

/// Query string shared by the quota routes.
#[derive(Debug, Default, Deserialize)]
pub struct QuotaParams {
    pub path: Option<String>,
    pub user: Option<String>,
    pub group: Option<String>,
    #[serde(rename = "type")]
    pub quota_type: Option<String>,
    pub pattern: Option<String>,
}

impl QuotaParams {
    fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }

    fn quota_type(&self) -> Result<Option<QuotaType>, ApiError> {
        match self.quota_type.as_deref().filter(|t| !t.is_empty()) {
            Some(t) => Ok(Some(t.parse()?)),
            None => Ok(None),
        }
    }
}

/// Health check endpoint.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "backend": state.resolver.backend_name(),
    }))
}

/// Default-user and default-group quotas.
pub async fn handle_defaults(
    State(state): State<Arc<AppState>>,
    RemoteCaller(_caller): RemoteCaller,
) -> Json<Vec<QuotaRecord>> {
    Json(state.resolver.default_quotas().await)
}

pub async fn handle_user(
    State(state): State<Arc<AppState>>,
    RemoteCaller(caller): RemoteCaller,
    Query(params): Query<QuotaParams>,
) -> ApiResult<QuotaResponse> {
    let response = state
        .resolver
        .user_quota(&caller, params.path(), params.user.as_deref())
        .await?;
    Ok(Json(response))
}

pub async fn handle_group(
    State(state): State<Arc<AppState>>,
    RemoteCaller(caller): RemoteCaller,
    Query(params): Query<QuotaParams>,
) -> ApiResult<QuotaResponse> {
    let response = state
        .resolver
        .group_quota(&caller, params.path(), params.group.as_deref())
        .await?;
    Ok(Json(response))
}

pub async fn handle_directory(
    State(state): State<Arc<AppState>>,
    RemoteCaller(_caller): RemoteCaller,
    Query(params): Query<QuotaParams>,
) -> ApiResult<QuotaResponse> {
    Ok(Json(state.resolver.directory_quota(params.path()).await?))
}

pub async fn handle_exceeded(
    State(state): State<Arc<AppState>>,
    RemoteCaller(caller): RemoteCaller,
    Query(params): Query<QuotaParams>,
) -> ApiResult<QuotaResponse> {
    let response = state
        .resolver
        .over_quota(&caller, params.path.as_deref())
        .await?;
    Ok(Json(response))
}

pub async fn handle_all(
    State(state): State<Arc<AppState>>,
    RemoteCaller(caller): RemoteCaller,
    Query(params): Query<QuotaParams>,
) -> ApiResult<QuotaResponse> {
    let quota_type = params.quota_type()?;
    let response = state
        .resolver
        .list_all(&caller, params.path.as_deref(), quota_type)
        .await?;
    Ok(Json(response))
}

/// Cache-only pattern lookup. Entries that could not be read are counted.
pub async fn handle_search(
    State(state): State<Arc<AppState>>,
    RemoteCaller(caller): RemoteCaller,
    Query(params): Query<QuotaParams>,
) -> ApiResult<Value> {
    let pattern = params.pattern.as_deref().unwrap_or("");
    let report = state.resolver.search(&caller, pattern).await?;
    Ok(Json(json!({
        "quotas": report.records,
        "skipped": report.skipped,
    })))
}

pub async fn handle_reload_defaults(
    State(state): State<Arc<AppState>>,
    RemoteCaller(caller): RemoteCaller,
) -> ApiResult<Value> {
    state
        .resolver
        .access()
        .require_admin(&caller, "reloading default quotas")?;
    let loaded = state.resolver.reload_defaults().await?;
    Ok(Json(json!({ "loaded": loaded })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::router;
    use crate::test_support::test_state;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn call(request: Request<Body>) -> (StatusCode, Value) {
        let response = router(test_state()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get_as(uri: &str, user: &str, groups: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(REMOTE_USER_HEADER, user)
            .header(REMOTE_GROUPS_HEADER, groups)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_parse_groups() {
        assert_eq!(parse_groups(" a, b ,,c"), vec!["a", "b", "c"]);
        assert!(parse_groups("").is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = call(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["backend"], "fake");
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthenticated() {
        let request = Request::builder()
            .uri("/quota/user?path=/ifs/home")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "AEC_UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn test_own_user_quota() {
        let (status, body) = call(get_as("/quota/user?path=/ifs/home", "alice", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["quotas"][0]["path"], "/ifs/home");
        assert_eq!(body["quotas"][0]["principal"]["name"], "alice");
    }

    #[tokio::test]
    async fn test_other_user_forbidden() {
        let (status, body) =
            call(get_as("/quota/user?path=/ifs/home&user=bob", "alice", "")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "AEC_FORBIDDEN");
    }

    #[tokio::test]
    async fn test_admin_group_may_view_others() {
        let (status, _) =
            call(get_as("/quota/user?path=/ifs/home&user=bob", "carol", "storage-admins")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_path_is_bad_request() {
        let (status, body) = call(get_as("/quota/user", "alice", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "AEC_BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let (status, body) =
            call(get_as("/quota/user?path=/ifs/home&user=ghost", "root", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "AEC_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_group_quota_for_caller_groups() {
        let (status, body) =
            call(get_as("/quota/group?path=/ifs/projects", "alice", "genomics")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["quotas"][0]["principal"]["name"], "genomics");
    }

    #[tokio::test]
    async fn test_list_all_requires_admin() {
        let (status, _) = call(get_as("/quota/all", "alice", "")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(get_as("/quota/all?type=directory", "root", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["quotas"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_all_rejects_unknown_type() {
        let (status, body) = call(get_as("/quota/all?type=bogus", "root", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "AEC_BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_search_reports_skipped() {
        let (status, body) = call(get_as("/quota/search?pattern=grp-none", "root", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["skipped"], 0);
        assert!(body["quotas"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reload_defaults_admin_only() {
        let request = |user: &str| {
            Request::builder()
                .method("POST")
                .uri("/admin/defaults/reload")
                .header(REMOTE_USER_HEADER, user)
                .body(Body::empty())
                .unwrap()
        };

        let (status, _) = call(request("alice")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(request("root")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["loaded"], 1);
    }

    #[tokio::test]
    async fn test_defaults_listing() {
        let state = test_state();
        state.resolver.reload_defaults().await.unwrap();
        let response = router(state)
            .oneshot(get_as("/", "alice", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body[0]["path"], "/ifs/home");
    }
}
