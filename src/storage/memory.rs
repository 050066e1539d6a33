//! In-memory session storage implementation
//!
//! This module provides a thread-safe, in-memory implementation of the SessionStore trait
//! using a HashMap protected by an async RwLock.

use crate::error::StorageResult;
use crate::namespace::KeyNamespace;
use crate::session::SessionRecord;
use crate::storage::SessionStore;
use crate::types::SessionId;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// In-memory session storage implementation
///
/// This implementation stores sessions in a HashMap protected by an async RwLock,
/// making it thread-safe for concurrent access. It's suitable for development,
/// testing, and single-instance deployments.
///
/// Expiry is checked on every access; an expired entry found during a read is
/// removed on the spot. A periodic sweeper can be started with
/// [`MemorySessionStore::spawn_sweeper`].
///
/// # Examples
///
/// ```
/// use sessionstore::{MemorySessionStore, SessionStore};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemorySessionStore::new();
///     let session_id = store.create(json!({"user": "alice"}), None, None).await?;
///
///     let retrieved = store.get(&session_id).await?;
///     assert_eq!(retrieved, Some(json!({"user": "alice"})));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    namespace: KeyNamespace,
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MemorySessionStore {
    /// Create a new in-memory session store with the default namespace
    pub fn new() -> Self {
        Self::with_namespace(KeyNamespace::default())
    }

    /// Create a new in-memory session store with a custom prefix and expiration
    pub fn with_namespace(namespace: KeyNamespace) -> Self {
        Self {
            namespace,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    /// Get the number of entries currently stored, expired ones included
    ///
    /// This is useful for monitoring and testing purposes.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Clear all sessions from the store
    ///
    /// This is primarily useful for testing purposes.
    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }

    /// Remove every expired entry, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        purge_expired(&self.sessions).await
    }

    /// Start a background task that purges expired entries every `interval`.
    ///
    /// Replaces a sweeper started earlier. The task stops on [`SessionStore::close`].
    pub async fn spawn_sweeper(&self, interval: Duration) {
        let sessions = Arc::clone(&self.sessions);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = purge_expired(&sessions).await;
                if removed > 0 {
                    debug!(removed, "Swept expired sessions");
                }
            }
        });

        if let Some(previous) = self.sweeper.lock().await.replace(handle) {
            previous.abort();
        }
        info!(interval_ms = interval.as_millis() as u64, "Started session sweeper");
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn purge_expired(sessions: &RwLock<HashMap<String, SessionRecord>>) -> usize {
    let mut sessions = sessions.write().await;
    let before = sessions.len();
    sessions.retain(|_, record| record.is_live());
    before - sessions.len()
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    async fn get_record(&self, session_id: &SessionId) -> StorageResult<Option<SessionRecord>> {
        let key = self.namespace.key(session_id);
        {
            let sessions = self.sessions.read().await;
            match sessions.get(&key) {
                Some(record) if record.is_live() => return Ok(Some(record.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: upgrade to a write lock and drop it unless someone refreshed it meanwhile
        let mut sessions = self.sessions.write().await;
        match sessions.get(&key) {
            Some(record) if record.is_live() => Ok(Some(record.clone())),
            Some(_) => {
                sessions.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_record(&self, record: SessionRecord) -> StorageResult<()> {
        let key = self.namespace.key(&record.session_id);
        self.sessions.write().await.insert(key, record);
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
        let key = self.namespace.key(session_id);
        let mut sessions = self.sessions.write().await;

        match sessions.get_mut(&key) {
            Some(record) if record.is_live() => {
                record.refresh(payload, ttl);
                Ok(true)
            }
            Some(_) => {
                sessions.remove(&key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<bool> {
        let key = self.namespace.key(session_id);
        let removed = self.sessions.write().await.remove(&key);
        Ok(removed.is_some_and(|record| record.is_live()))
    }

    async fn extend(&self, session_id: &SessionId, expiration: Option<u64>) -> StorageResult<bool> {
        let ttl = self.namespace.ttl(expiration)?;
        let key = self.namespace.key(session_id);
        let mut sessions = self.sessions.write().await;

        match sessions.get_mut(&key) {
            Some(record) if record.is_live() => {
                record.extend(ttl);
                Ok(true)
            }
            Some(_) => {
                sessions.remove(&key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn close(&self) -> StorageResult<()> {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
            debug!("Stopped session sweeper");
        }
        self.sessions.write().await.clear();
        Ok(())
    }
}
