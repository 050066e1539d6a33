//! SQL session storage implementation
//!
//! Sessions live in a single table keyed by the namespaced key. SQL has no
//! native TTL, so `live_until` (epoch milliseconds) is checked on every read
//! and an expired row met along the way is deleted.
//!
//! The store runs on `sqlx::AnyPool`, so the same code serves SQLite and, with
//! the `postgres-storage` feature, PostgreSQL.

use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::namespace::KeyNamespace;
use crate::session::SessionRecord;
use crate::storage::SessionStore;
use crate::types::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use tracing::{debug, info};

/// Database-backed session store
#[derive(Debug, Clone)]
pub struct DatabaseSessionStore {
    namespace: KeyNamespace,
    pool: AnyPool,
    table: String,
}

impl DatabaseSessionStore {
    /// Connect to the database described by `config`
    ///
    /// Creates the sessions table when `config.create_table` is set.
    ///
    /// # Errors
    /// - `StorageError::Configuration` for an invalid table name
    /// - `StorageError::Connection` if the pool cannot be opened
    pub async fn connect(config: &DatabaseConfig, namespace: KeyNamespace) -> StorageResult<Self> {
        validate_table_name(&config.table)?;
        sqlx::any::install_default_drivers();

        let mut options = AnyPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.acquire_timeout());
        if config.is_in_memory() {
            // every connection to an in-memory database sees a fresh, empty one
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = options
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to database: {}", e)))?;

        let store = Self {
            namespace,
            pool,
            table: config.table.clone(),
        };

        if config.create_table {
            store.create_table().await?;
        }

        info!(table = %store.table, "Database session store ready");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing)
    pub fn from_pool(
        pool: AnyPool,
        table: impl Into<String>,
        namespace: KeyNamespace,
    ) -> StorageResult<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self {
            namespace,
            pool,
            table,
        })
    }

    /// Create the sessions table and its expiry index if missing
    pub async fn create_table(&self) -> StorageResult<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                session_key TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                live_until BIGINT NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
            table = self.table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_live_until ON {table} (live_until)",
            table = self.table
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete every expired row, returning how many were removed
    pub async fn cleanup_expired(&self) -> StorageResult<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE live_until <= $1",
            self.table
        ))
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!(removed, table = %self.table, "Removed expired sessions");
        }
        Ok(removed)
    }

    /// Name of the backing table
    pub fn table(&self) -> &str {
        &self.table
    }

    async fn purge_if_expired(&self, key: &str) -> StorageResult<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE session_key = $1 AND live_until <= $2",
            self.table
        ))
        .bind(key)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn validate_table_name(table: &str) -> StorageResult<()> {
    let mut chars = table.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StorageError::Configuration(format!(
            "invalid table name: {:?}",
            table
        )))
    }
}

#[async_trait]
impl SessionStore for DatabaseSessionStore {
    fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    async fn get_record(&self, session_id: &SessionId) -> StorageResult<Option<SessionRecord>> {
        let key = self.namespace.key(session_id);
        let row = sqlx::query(&format!(
            "SELECT session_id, payload, live_until FROM {} WHERE session_key = $1",
            self.table
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let live_until_ms: i64 = row.try_get("live_until")?;
        if live_until_ms <= now_millis() {
            self.purge_if_expired(&key).await?;
            return Ok(None);
        }

        let stored_id: String = row.try_get("session_id")?;
        let payload: String = row.try_get("payload")?;
        let live_until = DateTime::<Utc>::from_timestamp_millis(live_until_ms).ok_or_else(|| {
            StorageError::Deserialization(format!("invalid live_until: {}", live_until_ms))
        })?;

        Ok(Some(SessionRecord {
            session_id: SessionId::from(stored_id),
            payload: serde_json::from_str(&payload)?,
            live_until,
        }))
    }

    async fn put_record(&self, record: SessionRecord) -> StorageResult<()> {
        let key = self.namespace.key(&record.session_id);
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let now = now_millis();

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (session_key, session_id, payload, live_until, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (session_key) DO UPDATE SET
                session_id = excluded.session_id,
                payload = excluded.payload,
                live_until = excluded.live_until,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
            self.table
        ))
        .bind(key.as_str())
        .bind(record.session_id.as_str())
        .bind(payload.as_str())
        .bind(record.live_until.timestamp_millis())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(
        &self,
        session_id: &SessionId,
        payload: Value,
        reset_expiration: bool,
        expiration: Option<u64>,
    ) -> StorageResult<bool> {
        let key = self.namespace.key(session_id);
        let payload = serde_json::to_string(&payload)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let now = now_millis();

        let result = if reset_expiration {
            let live_until = self.namespace.deadline(expiration)?.timestamp_millis();
            sqlx::query(&format!(
                "UPDATE {} SET payload = $1, live_until = $2, updated_at = $3 \
                 WHERE session_key = $4 AND live_until > $5",
                self.table
            ))
            .bind(payload.as_str())
            .bind(live_until)
            .bind(now)
            .bind(key.as_str())
            .bind(now)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "UPDATE {} SET payload = $1, updated_at = $2 \
                 WHERE session_key = $3 AND live_until > $4",
                self.table
            ))
            .bind(payload.as_str())
            .bind(now)
            .bind(key.as_str())
            .bind(now)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            self.purge_if_expired(&key).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<bool> {
        let key = self.namespace.key(session_id);
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE session_key = $1 AND live_until > $2",
            self.table
        ))
        .bind(key.as_str())
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.purge_if_expired(&key).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn extend(&self, session_id: &SessionId, expiration: Option<u64>) -> StorageResult<bool> {
        let key = self.namespace.key(session_id);
        let now = now_millis();
        let live_until = self.namespace.deadline(expiration)?.timestamp_millis();

        let result = sqlx::query(&format!(
            "UPDATE {} SET live_until = $1, updated_at = $2 \
             WHERE session_key = $3 AND live_until > $4",
            self.table
        ))
        .bind(live_until)
        .bind(now)
        .bind(key.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.purge_if_expired(&key).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn exists(&self, session_id: &SessionId) -> StorageResult<bool> {
        let key = self.namespace.key(session_id);
        let row = sqlx::query(&format!(
            "SELECT live_until FROM {} WHERE session_key = $1",
            self.table
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let live_until: i64 = row.try_get("live_until")?;
                if live_until > now_millis() {
                    Ok(true)
                } else {
                    self.purge_if_expired(&key).await?;
                    Ok(false)
                }
            }
            None => Ok(false),
        }
    }

    async fn close(&self) -> StorageResult<()> {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!(table = %self.table, "Database session store closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_store() -> DatabaseSessionStore {
        DatabaseSessionStore::connect(
            &DatabaseConfig::new("sqlite::memory:"),
            KeyNamespace::default(),
        )
        .await
        .unwrap()
    }

    async fn force_expire(store: &DatabaseSessionStore, id: &SessionId) {
        sqlx::query(&format!(
            "UPDATE {} SET live_until = $1 WHERE session_key = $2",
            store.table
        ))
        .bind(now_millis() - 1000)
        .bind(store.namespace.key(id).as_str())
        .execute(&store.pool)
        .await
        .unwrap();
    }

    async fn row_count(store: &DatabaseSessionStore) -> i64 {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", store.table))
            .fetch_one(&store.pool)
            .await
            .unwrap();
        row.try_get("n").unwrap()
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("sessions").is_ok());
        assert!(validate_table_name("_admin_sessions2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1sessions").is_err());
        assert!(validate_table_name("sessions; DROP TABLE users").is_err());
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_table_name() {
        let config = DatabaseConfig::new("sqlite::memory:").with_table("bad-name");
        let result = DatabaseSessionStore::connect(&config, KeyNamespace::default()).await;
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = test_store().await;
        let id = store
            .create(json!({"user": "alice", "roles": ["admin"]}), None, None)
            .await
            .unwrap();

        let payload = store.get(&id).await.unwrap();
        assert_eq!(payload, Some(json!({"user": "alice", "roles": ["admin"]})));
    }

    #[tokio::test]
    async fn test_create_overwrites() {
        let store = test_store().await;
        let id = SessionId::from("s1");
        store.create(json!(1), Some(id.clone()), None).await.unwrap();
        store.create(json!(2), Some(id.clone()), None).await.unwrap();

        assert_eq!(store.get(&id).await.unwrap(), Some(json!(2)));
        assert_eq!(row_count(&store).await, 1);
    }

    #[tokio::test]
    async fn test_get_record_round_trips_expiry() {
        let store = test_store().await;
        let record = SessionRecord::new(SessionId::from("s1"), json!(1), chrono::TimeDelta::seconds(60));
        store.put_record(record.clone()).await.unwrap();

        let fetched = store.get_record(&record.session_id).await.unwrap().unwrap();
        assert_eq!(
            fetched.live_until.timestamp_millis(),
            record.live_until.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_expired_row_is_not_found_and_purged() {
        let store = test_store().await;
        let id = store.create(json!(1), None, None).await.unwrap();
        force_expire(&store, &id).await;

        assert!(store.get(&id).await.unwrap().is_none());
        assert!(!store.exists(&id).await.unwrap());
        assert_eq!(row_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_update_reset_and_preserve() {
        let store = test_store().await;
        let id = store.create(json!(1), None, Some(60)).await.unwrap();
        let original = store.get_record(&id).await.unwrap().unwrap().live_until;

        assert!(store.update(&id, json!(2), false, None).await.unwrap());
        let preserved = store.get_record(&id).await.unwrap().unwrap();
        assert_eq!(preserved.payload, json!(2));
        assert_eq!(
            preserved.live_until.timestamp_millis(),
            original.timestamp_millis()
        );

        assert!(store.update(&id, json!(3), true, Some(3600)).await.unwrap());
        let reset = store.get_record(&id).await.unwrap().unwrap();
        assert_eq!(reset.payload, json!(3));
        assert!(reset.live_until > original);
    }

    #[tokio::test]
    async fn test_update_missing_or_expired() {
        let store = test_store().await;
        assert!(!store
            .update(&SessionId::from("missing"), json!(1), true, None)
            .await
            .unwrap());

        let id = store.create(json!(1), None, None).await.unwrap();
        force_expire(&store, &id).await;
        assert!(!store.update(&id, json!(2), true, None).await.unwrap());
        assert_eq!(row_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = test_store().await;
        let id = store.create(json!(1), None, None).await.unwrap();

        assert!(store.delete(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(!store.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_extend() {
        let store = test_store().await;
        let id = store.create(json!(1), None, Some(5)).await.unwrap();
        let before = store.get_record(&id).await.unwrap().unwrap().live_until;

        assert!(store.extend(&id, Some(600)).await.unwrap());
        let after = store.get_record(&id).await.unwrap().unwrap();
        assert!(after.live_until > before);
        assert_eq!(after.payload, json!(1));

        assert!(!store.extend(&SessionId::from("missing"), None).await.unwrap());
        assert_eq!(row_count(&store).await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = test_store().await;
        let a = store.create(json!(1), None, None).await.unwrap();
        let b = store.create(json!(2), None, None).await.unwrap();
        store.create(json!(3), None, None).await.unwrap();
        force_expire(&store, &a).await;
        force_expire(&store, &b).await;

        assert_eq!(store.cleanup_expired().await.unwrap(), 2);
        assert_eq!(row_count(&store).await, 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let store = test_store().await;
        store.close().await.unwrap();
        store.close().await.unwrap();

        let result = store.get(&SessionId::from("s1")).await;
        assert!(matches!(result, Err(StorageError::Closed)));
    }
}
