//! HTTP client shared by the REST adapters.
//!
//! Wraps reqwest with:
//! - Basic auth on every request
//! - Optional extra CA bundle or disabled certificate checks
//! - A per-adapter timeout

use crate::config::BackendDefaults;
use crate::error::{IquotaError, Result};
use reqwest::{header, Client, StatusCode};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Connection options for [`BackendHttp`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub user: String,
    pub password: String,
    pub timeout: Duration,
    pub ca_cert: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(BackendDefaults::REQUEST_TIMEOUT_SECS),
            ca_cert: None,
            insecure_skip_verify: false,
        }
    }
}

/// Authenticated JSON GET client.
pub struct BackendHttp {
    client: Client,
    user: String,
    password: String,
    timeout: Duration,
}

impl BackendHttp {
    pub fn new(options: HttpOptions) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(options.timeout)
            .user_agent(BackendDefaults::USER_AGENT)
            .danger_accept_invalid_certs(options.insecure_skip_verify);

        if let Some(path) = &options.ca_cert {
            let pem = std::fs::read(path).map_err(|e| IquotaError::io_with_path(e, path))?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| IquotaError::Config {
                message: format!("Invalid CA certificate {}: {}", path.display(), e),
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder.build().map_err(|e| IquotaError::Network {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(e),
        })?;

        Ok(Self {
            client,
            user: options.user,
            password: options.password,
            timeout: options.timeout,
        })
    }

    /// GET `url` and return the status and raw body.
    ///
    /// Non-2xx statuses are returned to the caller; only transport failures
    /// are errors here.
    pub async fn get(&self, url: &Url) -> Result<(StatusCode, Vec<u8>)> {
        debug!("GET {}", url);

        let mut request = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "application/json");
        if !self.user.is_empty() {
            request = request.basic_auth(&self.user, Some(&self.password));
        }

        let response = request.send().await.map_err(|e| self.transport_error("GET", url, e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error("GET", url, e))?;

        debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok((status, body.to_vec()))
    }

    fn transport_error(&self, verb: &str, url: &Url, e: reqwest::Error) -> IquotaError {
        if e.is_timeout() {
            IquotaError::Timeout(self.timeout)
        } else {
            IquotaError::Network {
                message: format!("{} {} failed: {}", verb, url.path(), e),
                source: Some(e),
            }
        }
    }
}
