//! Memcached session storage implementation
//!
//! The `memcache` client is synchronous, so every call runs on tokio's
//! blocking pool. Records are stored as JSON with a native expiry in whole
//! seconds, rounded up from the record's `live_until`.

use crate::config::MemcachedConfig;
use crate::error::{StorageError, StorageResult};
use crate::namespace::KeyNamespace;
use crate::session::SessionRecord;
use crate::storage::SessionStore;
use crate::types::SessionId;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Relative expirations above this many seconds are read by memcached as unix timestamps
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

/// Memcached-backed session store
pub struct MemcachedSessionStore {
    namespace: KeyNamespace,
    client: RwLock<Option<Arc<memcache::Client>>>,
}

impl MemcachedSessionStore {
    /// Connect using `config`
    pub async fn connect(config: &MemcachedConfig, namespace: KeyNamespace) -> StorageResult<Self> {
        let url = config.connection_url();
        let pool_size = config.pool_size.max(1);
        let client = run_blocking(move || memcache::Client::with_pool_size(url, pool_size))
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to Memcached: {}", e)))?;

        info!(
            host = %config.host,
            port = config.port,
            "Memcached session store ready"
        );
        Ok(Self::from_client(client, namespace))
    }

    /// Wrap an existing client
    pub fn from_client(client: memcache::Client, namespace: KeyNamespace) -> Self {
        Self {
            namespace,
            client: RwLock::new(Some(Arc::new(client))),
        }
    }

    async fn client(&self) -> StorageResult<Arc<memcache::Client>> {
        self.client
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(StorageError::Closed)
    }

    async fn write(&self, record: &SessionRecord) -> StorageResult<bool> {
        let key = self.namespace.key(&record.session_id);
        let client = self.client().await?;

        let Some(secs) = record.remaining_secs() else {
            run_blocking(move || client.delete(&key)).await?;
            return Ok(false);
        };
        let expiration = wire_expiration(secs);
        let value = serde_json::to_string(record)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        run_blocking(move || client.set(&key, value.as_str(), expiration)).await?;
        Ok(true)
    }
}

/// Memcached reads large relative expirations as absolute unix time
fn wire_expiration(secs: u64) -> u32 {
    let secs = if secs > MAX_RELATIVE_EXPIRATION {
        u64::try_from(Utc::now().timestamp()).unwrap_or(0) + secs
    } else {
        secs
    };
    u32::try_from(secs).unwrap_or(u32::MAX)
}

async fn run_blocking<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> Result<T, memcache::MemcacheError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Internal(format!("Memcached task failed: {}", e)))?
        .map_err(StorageError::from)
}

#[async_trait]
impl SessionStore for MemcachedSessionStore {
    fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    async fn get_record(&self, session_id: &SessionId) -> StorageResult<Option<SessionRecord>> {
        let key = self.namespace.key(session_id);
        let client = self.client().await?;
        let raw: Option<String> = run_blocking(move || client.get(&key)).await?;

        match raw {
            Some(raw) => {
                let record: SessionRecord = serde_json::from_str(&raw)?;
                Ok(record.is_live().then_some(record))
            }
            None => Ok(None),
        }
    }

    async fn put_record(&self, record: SessionRecord) -> StorageResult<()> {
        self.write(&record).await?;
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

        // no conditional write in this client; a key expiring between the read
        // and the write can be rewritten for at most the new ttl
        let Some(mut record) = self.get_record(session_id).await? else {
            return Ok(false);
        };
        record.refresh(payload, ttl);
        self.write(&record).await
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<bool> {
        let key = self.namespace.key(session_id);
        let client = self.client().await?;
        run_blocking(move || client.delete(&key)).await
    }

    async fn extend(&self, session_id: &SessionId, expiration: Option<u64>) -> StorageResult<bool> {
        let ttl = self.namespace.ttl(expiration)?;

        let Some(mut record) = self.get_record(session_id).await? else {
            return Ok(false);
        };
        record.extend(ttl);
        self.write(&record).await
    }

    async fn close(&self) -> StorageResult<()> {
        if self.client.write().await.take().is_some() {
            debug!("Memcached session store closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_expiration_relative() {
        assert_eq!(wire_expiration(1800), 1800);
        assert_eq!(wire_expiration(MAX_RELATIVE_EXPIRATION), MAX_RELATIVE_EXPIRATION as u32);
    }

    #[test]
    fn test_wire_expiration_absolute_for_long_ttl() {
        let secs = MAX_RELATIVE_EXPIRATION + 10;
        let wire = wire_expiration(secs) as i64;
        let expected = Utc::now().timestamp() + secs as i64;
        assert!((wire - expected).abs() <= 1);
    }

    // Requires a live server: set MEMCACHED_URL=host:port
    #[tokio::test]
    async fn test_crud_cycle() {
        let Ok(target) = std::env::var("MEMCACHED_URL") else {
            return;
        };
        let (host, port) = target.split_once(':').unwrap_or((target.as_str(), "11211"));
        let config = MemcachedConfig::default()
            .with_host(host)
            .with_port(port.parse().unwrap());
        let namespace = KeyNamespace::new(format!("test:{}:", SessionId::generate()), 60).unwrap();
        let store = MemcachedSessionStore::connect(&config, namespace).await.unwrap();

        let id = store.create(json!({"user": "alice"}), None, None).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(json!({"user": "alice"})));
        assert!(store.update(&id, json!({"user": "bob"}), false, None).await.unwrap());
        assert!(store.extend(&id, Some(120)).await.unwrap());
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.exists(&id).await.unwrap());
        assert!(!store.extend(&id, None).await.unwrap());

        store.close().await.unwrap();
        assert!(matches!(store.get(&id).await, Err(StorageError::Closed)));
    }
}
