//! iquota - quota reporting over heterogeneous storage backends.
//!
//! Normalizes quota records from OneFS and VAST (and from anything that can
//! write into the shared cache) into one schema, and shields the backends
//! from repeated lookups with a cache-aside layer that also remembers
//! confirmed absences.
//!
//! # Example
//!
//! ```rust,ignore
//! use iquota::{build_adapter, Caller, IquotaConfig, Resolver, SqliteStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> iquota::Result<()> {
//!     let config = IquotaConfig::from_file("/etc/iquota/iquota.toml".as_ref())?;
//!     let store = Arc::new(SqliteStore::in_memory()?);
//!     let resolver = Resolver::from_config(&config, build_adapter(&config)?, store);
//!     resolver.reload_defaults().await?;
//!
//!     let caller = Caller::new("alice", vec!["genomics".into()]);
//!     let quotas = resolver.group_quota(&caller, "/ifs/projects", None).await?;
//!     println!("{} group quotas", quotas.quotas.len());
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod resolver;

// Re-export commonly used types
pub use access::{AccessPolicy, Caller, Decision};
pub use backend::{build_adapter, BackendAdapter, DynBackendAdapter, ListQuery, QuotaQuery};
#[cfg(feature = "redis")]
pub use cache::RedisStore;
pub use cache::{CacheKey, KeyValueStore, QuotaCache, ScanReport, SqliteStore};
pub use config::{IquotaConfig, StoreErrorPolicy, StoreKind};
pub use error::{IquotaError, Result};
pub use models::{Principal, PrincipalKind, QuotaRecord, QuotaResponse, QuotaType};
pub use resolver::{CachePolicy, DefaultQuotaTable, RefreshReport, Resolver};
