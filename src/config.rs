//! Storage configuration
//!
//! [`StorageConfig`] is a flat key/value bag shared by every backend. Each
//! backend reads the typed structure it needs out of the bag through serde;
//! keys a backend does not know are ignored, so one bag can describe any
//! backend.

use crate::error::{StorageError, StorageResult};
use crate::namespace::{KeyNamespace, DEFAULT_EXPIRATION_SECS, DEFAULT_PREFIX};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Flat configuration bag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageConfig {
    values: Map<String, Value>,
}

impl StorageConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object
    pub fn from_value(value: Value) -> StorageResult<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            other => Err(StorageError::Configuration(format!(
                "storage configuration must be an object, got {}",
                other
            ))),
        }
    }

    /// Set a key
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a key
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Look up a key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Check if a key is present and not null
    pub fn contains(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| !v.is_null())
    }

    /// Map the bag onto a typed configuration, dropping unknown keys
    pub fn extract<T: DeserializeOwned>(&self) -> StorageResult<T> {
        serde_json::from_value(Value::Object(self.values.clone()))
            .map_err(|e| StorageError::Configuration(e.to_string()))
    }

    /// Key prefix and default expiration shared by every backend
    pub fn namespace(&self) -> StorageResult<KeyNamespace> {
        let common: CommonConfig = self.extract()?;
        common.namespace()
    }
}

/// Options every backend accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Default session lifetime in seconds
    #[serde(default = "default_expiration")]
    pub expiration: u64,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_expiration() -> u64 {
    DEFAULT_EXPIRATION_SECS
}

impl CommonConfig {
    pub fn namespace(&self) -> StorageResult<KeyNamespace> {
        KeyNamespace::new(self.prefix.clone(), self.expiration)
    }
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            expiration: default_expiration(),
        }
    }
}

/// In-memory backend options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Seconds between background sweeps of expired entries; no sweeper when unset
    #[serde(default)]
    pub cleanup_interval: Option<u64>,
}

impl MemoryConfig {
    pub fn cleanup_interval(&self) -> Option<Duration> {
        self.cleanup_interval
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Redis backend options
///
/// `url` takes precedence over the individual connection fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default)]
    pub db: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Seconds to wait for the initial connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

impl RedisConfig {
    /// Create a configuration from a `redis://` URL
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Set the host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the logical database index
    pub fn with_db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    /// Set credentials
    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username;
        self.password = Some(password.into());
        self
    }

    /// Set the connection timeout in seconds
    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout = Some(secs);
        self
    }

    /// Connection URL, built from the individual fields when `url` is unset
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{}:{}@", user, pass),
            (None, Some(pass)) => format!(":{}@", pass),
            (Some(user), None) => format!("{}@", user),
            (None, None) => String::new(),
        };
        format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.db)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_secs)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_redis_port(),
            db: 0,
            username: None,
            password: None,
            connect_timeout: None,
        }
    }
}

/// Memcached backend options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemcachedConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_memcached_port")]
    pub port: u16,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_memcached_port() -> u16 {
    11211
}

fn default_pool_size() -> u32 {
    1
}

impl MemcachedConfig {
    /// Set the host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connection pool size
    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn connection_url(&self) -> String {
        format!("memcache://{}:{}", self.host, self.port)
    }
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_memcached_port(),
            pool_size: default_pool_size(),
        }
    }
}

/// SQL backend options, read from the `database` block of the bag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL, e.g. `postgres://...` or `sqlite://sessions.db`
    pub url: String,

    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: u64,

    /// Create the sessions table on connect if missing
    #[serde(default = "default_create_table")]
    pub create_table: bool,
}

fn default_table() -> String {
    "sessions".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_create_table() -> bool {
    true
}

impl DatabaseConfig {
    /// Create a configuration with default pool settings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            table: default_table(),
            max_connections: default_max_connections(),
            acquire_timeout: default_acquire_timeout(),
            create_table: default_create_table(),
        }
    }

    /// Set the table name
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Set the maximum pool size
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Set the pool acquire timeout in seconds
    pub fn with_acquire_timeout(mut self, secs: u64) -> Self {
        self.acquire_timeout = secs;
        self
    }

    /// Enable or disable table creation on connect
    pub fn with_create_table(mut self, create_table: bool) -> Self {
        self.create_table = create_table;
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout)
    }

    /// In-memory SQLite databases live and die with a single connection
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}
