//! Session storage backends
//!
//! This module provides trait-based abstraction for session storage,
//! allowing different backend implementations (in-memory, Redis, Memcached,
//! SQL, and a hybrid cache-plus-database composition).

use crate::error::{StorageError, StorageResult};
use crate::namespace::KeyNamespace;
use crate::session::SessionRecord;
use crate::types::SessionId;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub mod hybrid;
pub mod memory;

#[cfg(feature = "database-storage")]
pub mod database;

#[cfg(feature = "memcached-storage")]
pub mod memcached;

#[cfg(feature = "redis-storage")]
pub mod redis;

/// Trait for session storage backends
///
/// Every backend exposes identical semantics so callers can swap them freely.
/// A missing session and an expired one look the same: `None` from reads and
/// `false` from mutations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Prefix and default expiration used by this store
    fn namespace(&self) -> &KeyNamespace;

    /// Fetch the full record, including its absolute expiry
    async fn get_record(&self, session_id: &SessionId) -> StorageResult<Option<SessionRecord>>;

    /// Write a record with a precomputed expiry, overwriting any existing one
    async fn put_record(&self, record: SessionRecord) -> StorageResult<()>;

    /// Create a new session
    ///
    /// # Arguments
    ///
    /// * `payload` - Session data
    /// * `session_id` - Optional id; a UUID is generated when omitted
    /// * `expiration` - Optional override of the default expiration, in seconds
    ///
    /// # Returns
    ///
    /// The session id used. An existing session with the same id is overwritten.
    async fn create(
        &self,
        payload: Value,
        session_id: Option<SessionId>,
        expiration: Option<u64>,
    ) -> StorageResult<SessionId> {
        let ttl = self.namespace().ttl(expiration)?;
        let session_id = session_id.unwrap_or_else(|| self.namespace().generate_session_id());
        self.put_record(SessionRecord::new(session_id.clone(), payload, ttl))
            .await?;
        Ok(session_id)
    }

    /// Get session data, `None` if absent or expired
    async fn get(&self, session_id: &SessionId) -> StorageResult<Option<Value>> {
        Ok(self.get_record(session_id).await?.map(|record| record.payload))
    }

    /// Replace session data
    ///
    /// When `reset_expiration` is false the existing expiry is preserved and
    /// `expiration` is ignored.
    ///
    /// # Returns
    ///
    /// true if the session existed and was updated
    async fn update(
        &self,
        session_id: &SessionId,
        payload: Value,
        reset_expiration: bool,
        expiration: Option<u64>,
    ) -> StorageResult<bool>;

    /// Delete a session
    ///
    /// # Returns
    ///
    /// true if the session existed and was removed
    async fn delete(&self, session_id: &SessionId) -> StorageResult<bool>;

    /// Give a session a fresh expiry without touching its data
    ///
    /// # Returns
    ///
    /// true if the session existed and was extended
    async fn extend(&self, session_id: &SessionId, expiration: Option<u64>) -> StorageResult<bool>;

    /// Check if a live session exists
    async fn exists(&self, session_id: &SessionId) -> StorageResult<bool> {
        Ok(self.get_record(session_id).await?.is_some())
    }

    /// Release held resources. Safe to call more than once.
    async fn close(&self) -> StorageResult<()>;
}

/// Typed payload helpers for any [`SessionStore`]
///
/// Payloads are encoded to and decoded from JSON with `serde_json`.
#[async_trait]
pub trait SessionStoreExt: SessionStore {
    /// Serialize `data` and create a session from it
    async fn create_as<T>(
        &self,
        data: &T,
        session_id: Option<SessionId>,
        expiration: Option<u64>,
    ) -> StorageResult<SessionId>
    where
        T: Serialize + Sync,
    {
        let payload = serde_json::to_value(data)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.create(payload, session_id, expiration).await
    }

    /// Fetch a session and decode it into `T`
    async fn get_as<T>(&self, session_id: &SessionId) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(session_id).await? {
            Some(payload) => serde_json::from_value(payload)
                .map(Some)
                .map_err(|e| StorageError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Serialize `data` and replace the session's payload with it
    async fn update_as<T>(
        &self,
        session_id: &SessionId,
        data: &T,
        reset_expiration: bool,
        expiration: Option<u64>,
    ) -> StorageResult<bool>
    where
        T: Serialize + Sync,
    {
        let payload = serde_json::to_value(data)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.update(session_id, payload, reset_expiration, expiration)
            .await
    }
}

impl<S: SessionStore + ?Sized> SessionStoreExt for S {}
