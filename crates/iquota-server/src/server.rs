//! HTTP server implementation using Axum.

use crate::handler::{
    handle_all, handle_defaults, handle_directory, handle_exceeded, handle_group, handle_health,
    handle_reload_defaults, handle_search, handle_user,
};
use axum::{
    routing::{get, post},
    Router,
};
use iquota::config::CacheDefaults;
use iquota::{IquotaConfig, KeyValueStore, RedisStore, Resolver, SqliteStore, StoreKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Application state shared across handlers.
pub struct AppState {
    pub resolver: Resolver,
}

/// Build the router over a shared resolver.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/", get(handle_defaults))
        .route("/quota/user", get(handle_user))
        .route("/quota/group", get(handle_group))
        .route("/quota/directory", get(handle_directory))
        .route("/quota/exceeded", get(handle_exceeded))
        .route("/quota/all", get(handle_all))
        .route("/quota/search", get(handle_search))
        .route("/admin/defaults/reload", post(handle_reload_defaults))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve in the background.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

/// Store handle opened from configuration.
///
/// The SQLite handle is kept separately so expired rows can be swept.
pub struct OpenedStore {
    pub store: Arc<dyn KeyValueStore>,
    pub sqlite: Option<Arc<SqliteStore>>,
}

pub fn open_store(config: &IquotaConfig) -> anyhow::Result<OpenedStore> {
    match config.store.kind {
        StoreKind::Sqlite => {
            let sqlite = match &config.store.path {
                Some(path) => {
                    info!("Opening SQLite cache at {}", path.display());
                    Arc::new(SqliteStore::new(path)?)
                }
                None => {
                    info!("Using in-memory SQLite cache");
                    Arc::new(SqliteStore::in_memory()?)
                }
            };
            Ok(OpenedStore {
                store: sqlite.clone(),
                sqlite: Some(sqlite),
            })
        }
        StoreKind::Redis => {
            let url = config
                .store
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("store.url is required for the redis store"))?;
            info!("Using Redis cache");
            let redis = RedisStore::new(url, config.store_connect_timeout())?;
            Ok(OpenedStore {
                store: Arc::new(redis),
                sqlite: None,
            })
        }
    }
}

/// A bulk refresh must write somewhere that outlives the process.
pub fn check_refresh_store(config: &IquotaConfig) -> anyhow::Result<()> {
    if config.store.kind == StoreKind::Sqlite && config.store.path.is_none() {
        anyhow::bail!(
            "refresh needs a persistent cache: set store.path for sqlite or use the redis store"
        );
    }
    Ok(())
}

/// Periodically delete expired SQLite rows.
pub fn spawn_cleanup(store: Arc<SqliteStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CacheDefaults::CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match store.cleanup_expired() {
                Ok(0) => {}
                Ok(n) => debug!("Removed {} expired cache entries", n),
                Err(e) => warn!("Cache cleanup failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;

    #[tokio::test]
    async fn test_server_starts() {
        let addr = start_server(test_state(), "127.0.0.1", 0).await.unwrap();
        assert!(addr.port() > 0);
    }

    #[test]
    fn test_open_store_in_memory_by_default() {
        let opened = open_store(&IquotaConfig::default()).unwrap();
        assert!(opened.sqlite.is_some());
        assert_eq!(opened.store.name(), "sqlite");
    }

    #[test]
    fn test_open_store_sqlite_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = IquotaConfig::default();
        config.store.path = Some(dir.path().join("cache.db"));
        open_store(&config).unwrap();
        assert!(dir.path().join("cache.db").exists());
    }

    #[test]
    fn test_refresh_rejects_in_memory_store() {
        let mut config = IquotaConfig::default();
        assert!(check_refresh_store(&config).is_err());

        config.store.path = Some("/var/lib/iquota/cache.db".into());
        assert!(check_refresh_store(&config).is_ok());

        let mut config = IquotaConfig::default();
        config.store.kind = StoreKind::Redis;
        config.store.url = Some("redis://127.0.0.1:6379/0".to_string());
        assert!(check_refresh_store(&config).is_ok());
    }

    #[test]
    fn test_open_store_redis_requires_url() {
        let mut config = IquotaConfig::default();
        config.store.kind = StoreKind::Redis;
        assert!(open_store(&config).is_err());
    }
}
