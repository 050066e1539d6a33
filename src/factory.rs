//! Backend selection
//!
//! [`open_store`] turns a backend name plus a flat [`StorageConfig`] into a
//! ready-to-use store. Each backend picks the keys it understands out of the
//! bag and ignores the rest.

use crate::config::{CommonConfig, DatabaseConfig, MemoryConfig, StorageConfig};
use crate::error::{StorageError, StorageResult};
use crate::namespace::KeyNamespace;
use crate::storage::hybrid::HybridSessionStore;
use crate::storage::memory::MemorySessionStore;
use crate::storage::SessionStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Key holding the SQL configuration block
pub const DATABASE_KEY: &str = "database";

/// Key selecting the hybrid cache tier explicitly
pub const CACHE_BACKEND_KEY: &str = "cache_backend";

/// Keys only Redis understands; their presence selects Redis as the hybrid cache tier
const REDIS_ONLY_KEYS: [&str; 4] = ["url", "db", "username", "password"];

/// Available storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-local map
    Memory,
    /// Redis; also accepted as `cache`
    Redis,
    /// Memcached
    Memcached,
    /// SQL database
    Database,
    /// Cache tier in front of a database
    Hybrid,
}

impl FromStr for Backend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "cache" | "redis" => Ok(Backend::Redis),
            "memcached" => Ok(Backend::Memcached),
            "database" => Ok(Backend::Database),
            "hybrid" => Ok(Backend::Hybrid),
            _ => Err(StorageError::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::Memory => "memory",
            Backend::Redis => "redis",
            Backend::Memcached => "memcached",
            Backend::Database => "database",
            Backend::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// Cache tier of a hybrid store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Redis,
    Memcached,
    Memory,
}

impl FromStr for CacheBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" | "cache" => Ok(CacheBackend::Redis),
            "memcached" => Ok(CacheBackend::Memcached),
            "memory" => Ok(CacheBackend::Memory),
            other => Err(StorageError::Configuration(format!(
                "unsupported hybrid cache backend: {}",
                other
            ))),
        }
    }
}

/// Open the store named by `backend`
///
/// # Errors
/// - `StorageError::UnknownBackend` for an unrecognized name
/// - `StorageError::Configuration` for missing or invalid settings, or a
///   backend whose cargo feature is disabled
/// - connection errors from the underlying client
///
/// # Example
/// ```
/// use sessionstore::{open_store, StorageConfig};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = StorageConfig::new()
///     .with("prefix", "app:")
///     .with("expiration", 600);
/// let store = open_store("memory", &config).await?;
///
/// let id = store.create(json!({"user": "alice"}), None, None).await?;
/// assert!(store.exists(&id).await?);
/// # Ok(())
/// # }
/// ```
pub async fn open_store(
    backend: &str,
    config: &StorageConfig,
) -> StorageResult<Arc<dyn SessionStore>> {
    open_backend(backend.parse()?, config).await
}

/// Open a store for an already parsed [`Backend`]
pub async fn open_backend(
    backend: Backend,
    config: &StorageConfig,
) -> StorageResult<Arc<dyn SessionStore>> {
    let common: CommonConfig = config.extract()?;
    let namespace = common.namespace()?;
    info!(
        backend = %backend,
        prefix = namespace.prefix(),
        expiration = namespace.expiration(),
        "Opening session store"
    );

    match backend {
        Backend::Memory => open_memory(config, namespace).await,
        Backend::Redis => open_redis(config, namespace).await,
        Backend::Memcached => open_memcached(config, namespace).await,
        Backend::Database => open_database(&database_config(config)?, namespace).await,
        Backend::Hybrid => open_hybrid(config, namespace).await,
    }
}

/// Read the mandatory `database` block
pub fn database_config(config: &StorageConfig) -> StorageResult<DatabaseConfig> {
    let block = config
        .get(DATABASE_KEY)
        .filter(|value| !value.is_null())
        .ok_or_else(|| {
            StorageError::Configuration(format!("`{}` configuration is required", DATABASE_KEY))
        })?;

    if !block.is_object() {
        return Err(StorageError::Configuration(format!(
            "`{}` configuration must be an object",
            DATABASE_KEY
        )));
    }

    serde_json::from_value(block.clone()).map_err(|e| {
        StorageError::Configuration(format!("invalid `{}` configuration: {}", DATABASE_KEY, e))
    })
}

/// Decide the hybrid cache tier.
///
/// An explicit `cache_backend` wins; otherwise any Redis-only key selects
/// Redis, and Redis is also the fallback.
///
/// Redis-only keys never override an explicit choice: `cache_backend =
/// "memcached"` together with `password` still yields Memcached, where
/// crudadmin's `get_session_storage` would switch to Redis.
pub fn select_cache_backend(config: &StorageConfig) -> StorageResult<CacheBackend> {
    if let Some(value) = config.get(CACHE_BACKEND_KEY).filter(|v| !v.is_null()) {
        let name = value.as_str().ok_or_else(|| {
            StorageError::Configuration(format!("`{}` must be a string", CACHE_BACKEND_KEY))
        })?;
        return name.parse();
    }

    if REDIS_ONLY_KEYS.iter().any(|key| config.contains(key)) {
        return Ok(CacheBackend::Redis);
    }
    Ok(CacheBackend::default())
}

async fn open_memory(
    config: &StorageConfig,
    namespace: KeyNamespace,
) -> StorageResult<Arc<dyn SessionStore>> {
    let memory: MemoryConfig = config.extract()?;
    let store = MemorySessionStore::with_namespace(namespace);
    if let Some(interval) = memory.cleanup_interval() {
        store.spawn_sweeper(interval).await;
    }
    Ok(Arc::new(store))
}

#[cfg(feature = "redis-storage")]
async fn open_redis(
    config: &StorageConfig,
    namespace: KeyNamespace,
) -> StorageResult<Arc<dyn SessionStore>> {
    use crate::config::RedisConfig;
    use crate::storage::redis::RedisSessionStore;

    let redis: RedisConfig = config.extract()?;
    Ok(Arc::new(RedisSessionStore::connect(&redis, namespace).await?))
}

#[cfg(not(feature = "redis-storage"))]
async fn open_redis(
    _config: &StorageConfig,
    _namespace: KeyNamespace,
) -> StorageResult<Arc<dyn SessionStore>> {
    Err(feature_disabled(Backend::Redis, "redis-storage"))
}

#[cfg(feature = "memcached-storage")]
async fn open_memcached(
    config: &StorageConfig,
    namespace: KeyNamespace,
) -> StorageResult<Arc<dyn SessionStore>> {
    use crate::config::MemcachedConfig;
    use crate::storage::memcached::MemcachedSessionStore;

    let memcached: MemcachedConfig = config.extract()?;
    Ok(Arc::new(
        MemcachedSessionStore::connect(&memcached, namespace).await?,
    ))
}

#[cfg(not(feature = "memcached-storage"))]
async fn open_memcached(
    _config: &StorageConfig,
    _namespace: KeyNamespace,
) -> StorageResult<Arc<dyn SessionStore>> {
    Err(feature_disabled(Backend::Memcached, "memcached-storage"))
}

#[cfg(feature = "database-storage")]
async fn open_database(
    database: &DatabaseConfig,
    namespace: KeyNamespace,
) -> StorageResult<Arc<dyn SessionStore>> {
    use crate::storage::database::DatabaseSessionStore;

    Ok(Arc::new(
        DatabaseSessionStore::connect(database, namespace).await?,
    ))
}

#[cfg(not(feature = "database-storage"))]
async fn open_database(
    _database: &DatabaseConfig,
    _namespace: KeyNamespace,
) -> StorageResult<Arc<dyn SessionStore>> {
    Err(feature_disabled(Backend::Database, "database-storage"))
}

async fn open_hybrid(
    config: &StorageConfig,
    namespace: KeyNamespace,
) -> StorageResult<Arc<dyn SessionStore>> {
    // validated before anything connects
    let database = database_config(config)?;
    let cache_backend = select_cache_backend(config)?;

    let durable = open_database(&database, namespace.clone()).await?;
    let cache = match cache_backend {
        CacheBackend::Redis => open_redis(config, namespace).await,
        CacheBackend::Memcached => open_memcached(config, namespace).await,
        CacheBackend::Memory => open_memory(config, namespace).await,
    };

    let cache = match cache {
        Ok(cache) => cache,
        Err(e) => {
            if let Err(close_err) = durable.close().await {
                warn!(error = %close_err, "Failed to close durable store after cache setup error");
            }
            return Err(e);
        }
    };

    info!(cache = ?cache_backend, "Hybrid session store ready");
    Ok(Arc::new(HybridSessionStore::new(cache, durable)))
}

#[cfg(any(
    not(feature = "redis-storage"),
    not(feature = "memcached-storage"),
    not(feature = "database-storage")
))]
fn feature_disabled(backend: Backend, feature: &str) -> StorageError {
    StorageError::Configuration(format!(
        "backend `{}` requires the `{}` feature",
        backend, feature
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("memory".parse::<Backend>().unwrap(), Backend::Memory);
        assert_eq!("cache".parse::<Backend>().unwrap(), Backend::Redis);
        assert_eq!("Redis".parse::<Backend>().unwrap(), Backend::Redis);
        assert_eq!("memcached".parse::<Backend>().unwrap(), Backend::Memcached);
        assert_eq!("database".parse::<Backend>().unwrap(), Backend::Database);
        assert_eq!(" hybrid ".parse::<Backend>().unwrap(), Backend::Hybrid);
    }

    #[test]
    fn test_unknown_backend() {
        let result = "mongodb".parse::<Backend>();
        assert!(matches!(result, Err(StorageError::UnknownBackend(name)) if name == "mongodb"));
    }

    #[test]
    fn test_select_cache_backend_default_is_redis() {
        let config = StorageConfig::new().with("host", "localhost");
        assert_eq!(select_cache_backend(&config).unwrap(), CacheBackend::Redis);
    }

    #[test]
    fn test_select_cache_backend_explicit() {
        let config = StorageConfig::new().with(CACHE_BACKEND_KEY, "memcached");
        assert_eq!(select_cache_backend(&config).unwrap(), CacheBackend::Memcached);

        let config = StorageConfig::new().with(CACHE_BACKEND_KEY, "memory");
        assert_eq!(select_cache_backend(&config).unwrap(), CacheBackend::Memory);
    }

    #[test]
    fn test_select_cache_backend_redis_keys() {
        let config = StorageConfig::new().with("password", "secret");
        assert_eq!(select_cache_backend(&config).unwrap(), CacheBackend::Redis);
    }

    #[test]
    fn test_select_cache_backend_explicit_beats_redis_keys() {
        let config = StorageConfig::new()
            .with(CACHE_BACKEND_KEY, "memcached")
            .with("db", 2)
            .with("password", "secret");
        assert_eq!(select_cache_backend(&config).unwrap(), CacheBackend::Memcached);
    }

    #[test]
    fn test_select_cache_backend_rejects_unknown() {
        let config = StorageConfig::new().with(CACHE_BACKEND_KEY, "couchbase");
        assert!(matches!(
            select_cache_backend(&config),
            Err(StorageError::Configuration(_))
        ));
    }

    #[test]
    fn test_database_config_required() {
        let result = database_config(&StorageConfig::new());
        assert!(matches!(result, Err(StorageError::Configuration(_))));

        let result = database_config(&StorageConfig::new().with(DATABASE_KEY, "sqlite::memory:"));
        assert!(matches!(result, Err(StorageError::Configuration(_))));

        let result = database_config(&StorageConfig::new().with(DATABASE_KEY, json!({"table": "t"})));
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[test]
    fn test_database_config_parsed() {
        let config = StorageConfig::new().with(
            DATABASE_KEY,
            json!({"url": "sqlite::memory:", "table": "admin_sessions"}),
        );
        let database = database_config(&config).unwrap();
        assert_eq!(database.url, "sqlite::memory:");
        assert_eq!(database.table, "admin_sessions");
    }

    #[tokio::test]
    async fn test_open_memory_ignores_foreign_keys() {
        let config = StorageConfig::new()
            .with("prefix", "app:")
            .with("host", "redis.internal")
            .with("pool_size", 10);
        let store = open_store("memory", &config).await.unwrap();
        assert_eq!(store.namespace().prefix(), "app:");
    }

    #[tokio::test]
    async fn test_open_hybrid_without_database_fails_fast() {
        let config = StorageConfig::new().with(CACHE_BACKEND_KEY, "memory");
        let result = open_store("hybrid", &config).await;
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_open_unknown_backend() {
        let result = open_store("etcd", &StorageConfig::new()).await;
        assert!(matches!(result, Err(StorageError::UnknownBackend(_))));
    }
}
