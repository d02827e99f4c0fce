//! Configuration for iquota.
//!
//! Constant defaults live on [`CacheDefaults`]. Runtime options are read from a
//! TOML file into [`IquotaConfig`]; every option has a default so an empty file
//! is a valid (cache-disabled) configuration.

use crate::error::{IquotaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cache and lookup defaults.
pub struct CacheDefaults;

impl CacheDefaults {
    pub const CACHE_EXPIRE_SECS: u64 = 500;
    pub const NEG_CACHE_EXPIRE_SECS: u64 = 86_400;
    pub const HOME_DIR: &'static str = "/home";
    pub const STORE_CONNECT_TIMEOUT_SECS: u64 = 5;
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
}

/// Backend connection defaults.
pub struct BackendDefaults;

impl BackendDefaults {
    pub const ONEFS_PORT: u16 = 8080;
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const USER_AGENT: &'static str = concat!("iquota/", env!("CARGO_PKG_VERSION"));
}

/// HTTP front end defaults.
pub struct ServerDefaults;

impl ServerDefaults {
    pub const BIND: &'static str = "127.0.0.1";
    pub const PORT: u16 = 8080;
}

/// What to do when the cache store fails during a single-entity lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreErrorPolicy {
    /// Log and carry on as if caching were off for that call.
    #[default]
    Bypass,
    /// Return `StoreUnavailable` to the caller.
    Fail,
}

/// Which live backend answers lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Onefs,
    Vast,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Sqlite,
    Redis,
}

/// Key/value store location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// SQLite database file. `None` keeps the cache in memory.
    pub path: Option<PathBuf>,
    /// Redis connection URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Sqlite,
            path: None,
            url: None,
            connect_timeout_secs: CacheDefaults::STORE_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// OneFS platform API connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneFsConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// PEM bundle trusted in addition to the system roots.
    pub ca_cert: Option<PathBuf>,
    pub insecure_skip_verify: bool,
    pub timeout_secs: u64,
}

impl Default for OneFsConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: BackendDefaults::ONEFS_PORT,
            user: String::new(),
            password: String::new(),
            ca_cert: None,
            insecure_skip_verify: false,
            timeout_secs: BackendDefaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

/// VAST REST API connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VastConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub insecure_skip_verify: bool,
    pub timeout_secs: u64,
}

impl Default for VastConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: String::new(),
            password: String::new(),
            insecure_skip_verify: false,
            timeout_secs: BackendDefaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ServerDefaults::BIND.to_string(),
            port: ServerDefaults::PORT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IquotaConfig {
    pub enable_cache: bool,
    /// Positive entry TTL in seconds.
    pub cache_expire: u64,
    /// Negative entry TTL in seconds.
    pub neg_cache_expire: u64,
    /// Keys under this prefix are left out of pattern scans.
    pub home_dir: String,
    /// User names or group names with elevated view rights.
    pub admins: Vec<String>,
    /// Cache entries under this prefix are unioned into exhaustive listings.
    pub cache_only_prefix: Option<String>,
    pub store_error_policy: StoreErrorPolicy,
    pub backend: BackendKind,
    pub store: StoreConfig,
    pub onefs: Option<OneFsConfig>,
    pub vast: Option<VastConfig>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl Default for IquotaConfig {
    fn default() -> Self {
        Self {
            enable_cache: false,
            cache_expire: CacheDefaults::CACHE_EXPIRE_SECS,
            neg_cache_expire: CacheDefaults::NEG_CACHE_EXPIRE_SECS,
            home_dir: CacheDefaults::HOME_DIR.to_string(),
            admins: Vec::new(),
            cache_only_prefix: None,
            store_error_policy: StoreErrorPolicy::Bypass,
            backend: BackendKind::Onefs,
            store: StoreConfig::default(),
            onefs: None,
            vast: None,
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl IquotaConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| IquotaError::io_with_path(e, path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_expire)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.neg_cache_expire)
    }

    pub fn store_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.store.connect_timeout_secs)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.enable_cache && (self.cache_expire == 0 || self.neg_cache_expire == 0) {
            return Err(IquotaError::Config {
                message: "cache_expire and neg_cache_expire must be positive when caching is enabled"
                    .to_string(),
            });
        }

        if !self.home_dir.starts_with('/') {
            return Err(IquotaError::Config {
                message: format!("home_dir must be an absolute path, got '{}'", self.home_dir),
            });
        }

        if let Some(prefix) = &self.cache_only_prefix {
            if prefix.is_empty() {
                return Err(IquotaError::Config {
                    message: "cache_only_prefix must not be empty".to_string(),
                });
            }
        }

        if self.store.kind == StoreKind::Redis {
            if !cfg!(feature = "redis") {
                return Err(IquotaError::Config {
                    message: "redis store requested but iquota was built without the redis feature"
                        .to_string(),
                });
            }
            if self.store.url.as_deref().map_or(true, str::is_empty) {
                return Err(IquotaError::Config {
                    message: "store.url is required for the redis store".to_string(),
                });
            }
        }

        match self.backend {
            BackendKind::Onefs => match &self.onefs {
                Some(onefs) if !onefs.host.is_empty() => {}
                _ => {
                    return Err(IquotaError::Config {
                        message: "backend 'onefs' requires an [onefs] section with a host".to_string(),
                    })
                }
            },
            BackendKind::Vast => match &self.vast {
                Some(vast) if !vast.host.is_empty() => {}
                _ => {
                    return Err(IquotaError::Config {
                        message: "backend 'vast' requires a [vast] section with a host".to_string(),
                    })
                }
            },
        }

        Ok(())
    }
}
