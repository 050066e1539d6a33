//! Error types for session storage
//!
//! Absence of a session is never an error: lookups return `None` and mutations
//! return `false`. The variants below cover configuration mistakes and real
//! backend failures only.

use thiserror::Error;

/// Storage-related errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    /// Connection failed
    #[error("Storage connection failed: {0}")]
    Connection(String),

    /// Query failed
    #[error("Storage query failed: {0}")]
    Query(String),

    /// Serialization failed
    #[error("Storage serialization failed: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Storage deserialization failed: {0}")]
    Deserialization(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backend name not recognized by the factory
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// Expiration of zero seconds, or too large to represent
    #[error("Invalid expiration: {0}")]
    InvalidExpiration(String),

    /// Operation attempted after `close`
    #[error("Storage backend is closed")]
    Closed,

    /// One or more resources failed to close
    #[error("Failed to close storage: {0}")]
    Close(String),

    /// Backend reachable but temporarily refusing work (loading, failover)
    #[error("Storage backend not available: {0}")]
    BackendUnavailable(String),

    /// Internal storage error
    #[error("Internal storage error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            StorageError::Deserialization(err.to_string())
        } else {
            StorageError::Serialization(err.to_string())
        }
    }
}

#[cfg(feature = "database-storage")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => StorageError::Closed,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                StorageError::Connection(err.to_string())
            }
            other => StorageError::Query(other.to_string()),
        }
    }
}

#[cfg(feature = "redis-storage")]
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        use redis::ErrorKind;

        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            return StorageError::Connection(err.to_string());
        }
        match err.kind() {
            ErrorKind::BusyLoadingError
            | ErrorKind::TryAgain
            | ErrorKind::ClusterDown
            | ErrorKind::MasterDown => StorageError::BackendUnavailable(err.to_string()),
            _ => StorageError::Query(err.to_string()),
        }
    }
}

#[cfg(feature = "memcached-storage")]
impl From<memcache::MemcacheError> for StorageError {
    fn from(err: memcache::MemcacheError) -> Self {
        StorageError::Query(err.to_string())
    }
}

/// Type alias for Storage Result
pub type StorageResult<T> = std::result::Result<T, StorageError>;
