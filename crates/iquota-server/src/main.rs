//! iquota server - HTTP front end for quota lookups.
//!
//! Serves user, group and directory quotas from the configured backend
//! through the shared cache. The `refresh` subcommand bulk-loads directory
//! quotas into the cache and exits, for use from cron.

mod handler;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iquota::config::LogFormat;
use iquota::{build_adapter, IquotaConfig, Resolver};
use server::{check_refresh_store, open_store, spawn_cleanup, start_server, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "iquota-server")]
#[command(about = "Quota reporting server")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "/etc/iquota/iquota.toml")]
    conf: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Address to bind to (overrides the config file)
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides the config file, 0 = auto-assign)
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Serve HTTP requests (default)
    Serve,
    /// Load every directory quota into the cache, then exit
    Refresh,
}

fn init_logging(config: &IquotaConfig, debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(&config.logging.level)
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = IquotaConfig::from_file(&args.conf)
        .with_context(|| format!("loading {}", args.conf.display()))?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    init_logging(&config, args.debug);
    info!("Starting iquota server");

    let command = args.command.unwrap_or(Command::Serve);
    if command == Command::Refresh {
        check_refresh_store(&config)?;
    }

    let adapter = build_adapter(&config)?;
    let opened = open_store(&config)?;
    let resolver = Resolver::from_config(&config, adapter, opened.store.clone());
    info!(
        "Backend {} with {} cache (enabled: {})",
        resolver.backend_name(),
        opened.store.name(),
        config.enable_cache
    );

    match command {
        Command::Refresh => {
            let report = resolver.refresh_directories().await?;
            info!("Refresh complete: {} cached, {} failed", report.cached, report.failed);
            Ok(())
        }
        Command::Serve => {
            if let Err(e) = resolver.reload_defaults().await {
                warn!("Could not load default quotas, continuing without them: {}", e);
            }

            if let Some(sqlite) = opened.sqlite {
                spawn_cleanup(sqlite);
            }

            let state = Arc::new(AppState { resolver });
            let addr = start_server(state, &config.server.bind, config.server.port).await?;
            info!("iquota server running on {}", addr);

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
            Ok(())
        }
    }
}

#[cfg(test)]
mod test_support {
    use crate::server::AppState;
    use async_trait::async_trait;
    use iquota::{
        BackendAdapter, IquotaConfig, IquotaError, ListQuery, Principal, PrincipalKind, QuotaQuery,
        QuotaRecord, QuotaResponse, QuotaType, Resolver, SqliteStore,
    };
    use std::sync::Arc;

    /// Backend that knows every principal except "ghost".
    pub struct StubAdapter;

    #[async_trait]
    impl BackendAdapter for StubAdapter {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch(&self, query: &QuotaQuery) -> iquota::Result<QuotaResponse> {
            let record = match (&query.principal, query.quota_type) {
                (Some(name), _) if name == "ghost" => {
                    return Err(IquotaError::not_found(query.describe()))
                }
                (Some(name), QuotaType::Group) => QuotaRecord::for_principal(
                    query.path.as_str(),
                    PrincipalKind::Group,
                    Principal::named(name.as_str()),
                ),
                (Some(name), _) => QuotaRecord::for_principal(
                    query.path.as_str(),
                    PrincipalKind::User,
                    Principal::named(name.as_str()),
                ),
                (None, _) => QuotaRecord::directory(query.path.as_str()),
            };
            Ok(QuotaResponse::new(vec![record.with_byte_limits(0, 100)]))
        }

        async fn fetch_page(
            &self,
            query: &ListQuery,
            _resume: Option<&str>,
        ) -> iquota::Result<QuotaResponse> {
            let all = vec![
                QuotaRecord::directory("/ifs/projects/a").with_usage(10, 1),
                QuotaRecord::for_principal("/ifs/home", PrincipalKind::User, Principal::named("alice"))
                    .with_byte_limits(0, 5)
                    .with_usage(5, 1),
            ];
            let quotas = all
                .into_iter()
                .filter(|r| query.quota_type.map_or(true, |t| r.quota_type == t))
                .collect();
            Ok(QuotaResponse::new(quotas))
        }

        async fn fetch_defaults(&self) -> iquota::Result<Vec<QuotaRecord>> {
            Ok(vec![QuotaRecord::default_for("/ifs/home", PrincipalKind::User)])
        }
    }

    pub fn test_state() -> Arc<AppState> {
        let config = IquotaConfig {
            admins: vec!["root".to_string(), "storage-admins".to_string()],
            ..IquotaConfig::default()
        };
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let resolver = Resolver::from_config(&config, Arc::new(StubAdapter), store);
        Arc::new(AppState { resolver })
    }
}
