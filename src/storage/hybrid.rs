//! Hybrid cache-plus-database session storage
//!
//! [`HybridSessionStore`] puts a fast, volatile cache store in front of a
//! durable store. The durable store decides whether a session exists and what
//! it holds; the cache only serves reads.
//!
//! Ordering rules:
//!
//! - writes hit the durable store first and are copied to the cache only
//!   after they succeed;
//! - reads try the cache first, fall back to the durable store on a miss and
//!   copy what they find back into the cache;
//! - any cache failure is logged and absorbed, and when a cache write fails
//!   the entry is dropped so the cache never holds a payload the durable store
//!   does not.
//!
//! Durable-store errors always propagate.

use crate::error::{StorageError, StorageResult};
use crate::namespace::KeyNamespace;
use crate::session::SessionRecord;
use crate::storage::SessionStore;
use crate::types::SessionId;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Session store combining a cache tier with a durable tier
///
/// # Examples
///
/// ```
/// use sessionstore::{HybridSessionStore, MemorySessionStore, SessionStore};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let cache = MemorySessionStore::new();
///     let durable = MemorySessionStore::new();
///     let store = HybridSessionStore::new(Arc::new(cache.clone()), Arc::new(durable));
///
///     let id = store.create(json!({"user": "alice"}), None, None).await?;
///     cache.clear().await;
///
///     // served by the durable tier, then cached again
///     assert_eq!(store.get(&id).await?, Some(json!({"user": "alice"})));
///     assert!(cache.exists(&id).await?);
///     Ok(())
/// }
/// ```
pub struct HybridSessionStore {
    cache: Arc<dyn SessionStore>,
    durable: Arc<dyn SessionStore>,
}

impl HybridSessionStore {
    /// Compose `cache` in front of `durable`.
    ///
    /// The durable store's namespace (prefix and default expiration) governs
    /// every operation.
    pub fn new(cache: Arc<dyn SessionStore>, durable: Arc<dyn SessionStore>) -> Self {
        Self { cache, durable }
    }

    /// The cache tier
    pub fn cache(&self) -> &Arc<dyn SessionStore> {
        &self.cache
    }

    /// The durable tier
    pub fn durable(&self) -> &Arc<dyn SessionStore> {
        &self.durable
    }

    /// Copy a durable record into the cache, dropping the cache entry if that fails
    async fn write_through(&self, record: SessionRecord) {
        let session_id = record.session_id.clone();
        if let Err(e) = self.cache.put_record(record).await {
            warn!(session_id = %session_id, error = %e, "Cache write-through failed");
            self.invalidate(&session_id).await;
        }
    }

    /// Best-effort removal of a cache entry
    async fn invalidate(&self, session_id: &SessionId) {
        if let Err(e) = self.cache.delete(session_id).await {
            warn!(session_id = %session_id, error = %e, "Cache invalidation failed");
        }
    }

    /// Reload a session from the durable store into the cache, or drop it from the cache
    async fn resync(&self, session_id: &SessionId) {
        match self.durable.get_record(session_id).await {
            Ok(Some(record)) => self.write_through(record).await,
            Ok(None) => self.invalidate(session_id).await,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Durable reload for cache failed");
                self.invalidate(session_id).await;
            }
        }
    }
}

#[async_trait]
impl SessionStore for HybridSessionStore {
    fn namespace(&self) -> &KeyNamespace {
        self.durable.namespace()
    }

    async fn get_record(&self, session_id: &SessionId) -> StorageResult<Option<SessionRecord>> {
        match self.cache.get_record(session_id).await {
            Ok(Some(record)) => {
                debug!(session_id = %session_id, "Session cache hit");
                return Ok(Some(record));
            }
            Ok(None) => debug!(session_id = %session_id, "Session cache miss"),
            Err(e) => warn!(session_id = %session_id, error = %e, "Cache read failed, using durable store"),
        }

        match self.durable.get_record(session_id).await? {
            Some(record) => {
                self.write_through(record.clone()).await;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn put_record(&self, record: SessionRecord) -> StorageResult<()> {
        self.durable.put_record(record.clone()).await?;
        self.write_through(record).await;
        Ok(())
    }

    async fn create(
        &self,
        payload: Value,
        session_id: Option<SessionId>,
        expiration: Option<u64>,
    ) -> StorageResult<SessionId> {
        let ttl = self.namespace().ttl(expiration)?;
        let session_id = session_id.unwrap_or_else(|| self.namespace().generate_session_id());
        let record = SessionRecord::new(session_id.clone(), payload, ttl);

        // cache and database share one live_until
        self.put_record(record).await?;
        Ok(session_id)
    }

    async fn update(
        &self,
        session_id: &SessionId,
        payload: Value,
        reset_expiration: bool,
        expiration: Option<u64>,
    ) -> StorageResult<bool> {
        let updated = self
            .durable
            .update(session_id, payload.clone(), reset_expiration, expiration)
            .await?;

        if !updated {
            self.invalidate(session_id).await;
            return Ok(false);
        }

        // the cache must not fall back to a default of its own
        let expiration = Some(expiration.unwrap_or(self.namespace().expiration()));
        match self
            .cache
            .update(session_id, payload, reset_expiration, expiration)
            .await
        {
            Ok(true) => {}
            Ok(false) => self.resync(session_id).await,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Cache update failed");
                self.invalidate(session_id).await;
            }
        }
        Ok(true)
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<bool> {
        let deleted = self.durable.delete(session_id).await;
        // cleared whatever the durable store says, even on error
        self.invalidate(session_id).await;
        deleted
    }

    async fn extend(&self, session_id: &SessionId, expiration: Option<u64>) -> StorageResult<bool> {
        if !self.durable.extend(session_id, expiration).await? {
            return Ok(false);
        }

        let expiration = Some(expiration.unwrap_or(self.namespace().expiration()));
        match self.cache.extend(session_id, expiration).await {
            Ok(true) => {}
            Ok(false) => self.resync(session_id).await,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Cache extend failed");
                self.invalidate(session_id).await;
            }
        }
        Ok(true)
    }

    async fn exists(&self, session_id: &SessionId) -> StorageResult<bool> {
        match self.cache.exists(session_id).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => warn!(session_id = %session_id, error = %e, "Cache exists check failed"),
        }
        self.durable.exists(session_id).await
    }

    async fn close(&self) -> StorageResult<()> {
        let cache = self.cache.close().await;
        let durable = self.durable.close().await;

        let mut failures = Vec::new();
        if let Err(e) = cache {
            warn!(error = %e, "Failed to close cache store");
            failures.push(format!("cache: {}", e));
        }
        if let Err(e) = durable {
            warn!(error = %e, "Failed to close durable store");
            failures.push(format!("durable: {}", e));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Close(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemorySessionStore;
    use serde_json::json;

    fn hybrid() -> (HybridSessionStore, MemorySessionStore, MemorySessionStore) {
        let cache = MemorySessionStore::new();
        let durable = MemorySessionStore::new();
        let store = HybridSessionStore::new(Arc::new(cache.clone()), Arc::new(durable.clone()));
        (store, cache, durable)
    }

    #[tokio::test]
    async fn test_create_writes_both_tiers_with_same_expiry() {
        let (store, cache, durable) = hybrid();
        let id = store.create(json!({"n": 1}), None, Some(60)).await.unwrap();

        let cached = cache.get_record(&id).await.unwrap().unwrap();
        let stored = durable.get_record(&id).await.unwrap().unwrap();
        assert_eq!(cached, stored);
    }

    #[tokio::test]
    async fn test_get_prefers_cache() {
        let (store, cache, _durable) = hybrid();
        let id = store.create(json!(1), None, None).await.unwrap();

        // a cache-only value proves which tier answered
        cache.update(&id, json!("cached"), false, None).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(json!("cached")));
    }

    #[tokio::test]
    async fn test_get_repopulates_cache_with_durable_expiry() {
        let (store, cache, durable) = hybrid();
        let id = store.create(json!(1), None, Some(120)).await.unwrap();
        cache.clear().await;

        assert_eq!(store.get(&id).await.unwrap(), Some(json!(1)));
        assert_eq!(
            cache.get_record(&id).await.unwrap().unwrap().live_until,
            durable.get_record(&id).await.unwrap().unwrap().live_until
        );
    }

    #[tokio::test]
    async fn test_update_missing_in_durable_clears_cache() {
        let (store, cache, durable) = hybrid();
        let id = store.create(json!(1), None, None).await.unwrap();
        durable.clear().await;

        assert!(!store.update(&id, json!(2), true, None).await.unwrap());
        assert!(!cache.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_recreates_missing_cache_entry() {
        let (store, cache, _durable) = hybrid();
        let id = store.create(json!(1), None, None).await.unwrap();
        cache.clear().await;

        assert!(store.update(&id, json!(2), true, None).await.unwrap());
        assert_eq!(cache.get(&id).await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_delete_clears_cache_even_if_durable_missing() {
        let (store, cache, durable) = hybrid();
        let id = store.create(json!(1), None, None).await.unwrap();
        durable.clear().await;

        assert!(!store.delete(&id).await.unwrap());
        assert!(!cache.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_extend_missing_takes_no_cache_action() {
        let (store, cache, _durable) = hybrid();
        let id = SessionId::from("ghost");

        assert!(!store.extend(&id, None).await.unwrap());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_extend_recreates_missing_cache_entry() {
        let (store, cache, durable) = hybrid();
        let id = store.create(json!(1), None, Some(5)).await.unwrap();
        cache.clear().await;

        assert!(store.extend(&id, Some(600)).await.unwrap());
        assert_eq!(
            cache.get_record(&id).await.unwrap().unwrap(),
            durable.get_record(&id).await.unwrap().unwrap()
        );
    }

    #[tokio::test]
    async fn test_exists_falls_back_without_repopulating() {
        let (store, cache, _durable) = hybrid();
        let id = store.create(json!(1), None, None).await.unwrap();
        cache.clear().await;

        assert!(store.exists(&id).await.unwrap());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_namespace_comes_from_durable() {
        let cache = MemorySessionStore::new();
        let durable =
            MemorySessionStore::with_namespace(KeyNamespace::new("db:", 42).unwrap());
        let store = HybridSessionStore::new(Arc::new(cache), Arc::new(durable));
        assert_eq!(store.namespace().prefix(), "db:");
        assert_eq!(store.namespace().expiration(), 42);
    }
}
