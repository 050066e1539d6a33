//! Redis session storage implementation
//!
//! Each session is stored as a JSON-encoded [`SessionRecord`] under its
//! namespaced key, with Redis' own millisecond TTL (`SET .. PX`) matching the
//! record's `live_until`. Mutations of existing sessions use `SET .. XX` so a
//! key that expired in the meantime is never brought back.

use crate::config::RedisConfig;
use crate::error::{StorageError, StorageResult};
use crate::namespace::KeyNamespace;
use crate::session::SessionRecord;
use crate::storage::SessionStore;
use crate::types::SessionId;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Redis-backed session store
pub struct RedisSessionStore {
    namespace: KeyNamespace,
    connection: RwLock<Option<ConnectionManager>>,
}

impl RedisSessionStore {
    /// Connect using `config`, honouring its connect timeout
    ///
    /// # Errors
    /// - `StorageError::Configuration` if the connection URL is malformed
    /// - `StorageError::Connection` if Redis is unreachable or the timeout elapses
    pub async fn connect(config: &RedisConfig, namespace: KeyNamespace) -> StorageResult<Self> {
        let client = redis::Client::open(config.connection_url())
            .map_err(|e| StorageError::Configuration(format!("Invalid Redis URL: {}", e)))?;

        let connecting = client.get_connection_manager();
        let connection = match config.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, connecting)
                .await
                .map_err(|_| {
                    StorageError::Connection(format!(
                        "Timed out connecting to Redis after {}s",
                        timeout.as_secs()
                    ))
                })?,
            None => connecting.await,
        }
        .map_err(|e| StorageError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        info!(prefix = namespace.prefix(), "Redis session store ready");
        Ok(Self::from_connection_manager(connection, namespace))
    }

    /// Wrap an existing connection manager
    pub fn from_connection_manager(connection: ConnectionManager, namespace: KeyNamespace) -> Self {
        Self {
            namespace,
            connection: RwLock::new(Some(connection)),
        }
    }

    async fn conn(&self) -> StorageResult<ConnectionManager> {
        self.connection
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(StorageError::Closed)
    }

    /// `SET key value PX ttl`, optionally only when the key already exists.
    ///
    /// Returns false when `only_existing` is set and the key was absent.
    async fn write(&self, record: &SessionRecord, only_existing: bool) -> StorageResult<bool> {
        let key = self.namespace.key(&record.session_id);
        let mut conn = self.conn().await?;

        let Some(ttl_ms) = record.remaining_millis() else {
            // already past live_until: nothing live may remain under this key
            let _: i64 = conn.del(key.as_str()).await?;
            return Ok(false);
        };

        let value = serde_json::to_string(record)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(key.as_str()).arg(value).arg("PX").arg(ttl_ms);
        if only_existing {
            cmd.arg("XX");
        }

        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    async fn get_record(&self, session_id: &SessionId) -> StorageResult<Option<SessionRecord>> {
        let key = self.namespace.key(session_id);
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(key.as_str()).await?;

        match raw {
            Some(raw) => {
                let record: SessionRecord = serde_json::from_str(&raw)?;
                Ok(record.is_live().then_some(record))
            }
            None => Ok(None),
        }
    }

    async fn put_record(&self, record: SessionRecord) -> StorageResult<()> {
        self.write(&record, false).await?;
        Ok(())
    }

    async fn update(
        &self,
        session_id: &SessionId,
        payload: Value,
        reset_expiration: bool,
        expiration: Option<u64>,
    ) -> StorageResult<bool> {
        let ttl = if reset_expiration {
            Some(self.namespace.ttl(expiration)?)
        } else {
            None
        };

        let Some(mut record) = self.get_record(session_id).await? else {
            return Ok(false);
        };
        record.refresh(payload, ttl);
        self.write(&record, true).await
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<bool> {
        let key = self.namespace.key(session_id);
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key.as_str()).await?;
        Ok(removed > 0)
    }

    async fn extend(&self, session_id: &SessionId, expiration: Option<u64>) -> StorageResult<bool> {
        let ttl = self.namespace.ttl(expiration)?;

        let Some(mut record) = self.get_record(session_id).await? else {
            return Ok(false);
        };
        record.extend(ttl);
        self.write(&record, true).await
    }

    async fn exists(&self, session_id: &SessionId) -> StorageResult<bool> {
        let key = self.namespace.key(session_id);
        let mut conn = self.conn().await?;
        let present: bool = conn.exists(key.as_str()).await?;
        Ok(present)
    }

    async fn close(&self) -> StorageResult<()> {
        if self.connection.write().await.take().is_some() {
            debug!("Redis session store closed");
        }
        Ok(())
    }
}
