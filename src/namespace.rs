//! Key namespacing and expiration resolution
//!
//! Every backend stores a session under `prefix + session_id` and falls back
//! to the same default expiration when an operation does not override it.

use crate::error::{StorageError, StorageResult};
use crate::types::SessionId;
use chrono::{DateTime, TimeDelta, Utc};

/// Default prefix for all session keys
pub const DEFAULT_PREFIX: &str = "session:";

/// Default session expiration in seconds
pub const DEFAULT_EXPIRATION_SECS: u64 = 1800;

/// Prefix and default expiration shared by a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    prefix: String,
    expiration: u64,
}

impl KeyNamespace {
    /// Create a namespace, rejecting a default expiration that is zero or
    /// whose deadline cannot be represented
    pub fn new(prefix: impl Into<String>, expiration: u64) -> StorageResult<Self> {
        resolve(expiration)?;
        Ok(Self {
            prefix: prefix.into(),
            expiration,
        })
    }

    /// Key prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Default expiration in seconds
    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    /// Full storage key for a session id
    pub fn key(&self, session_id: &SessionId) -> String {
        format!("{}{}", self.prefix, session_id)
    }

    /// Generate a fresh session id
    pub fn generate_session_id(&self) -> SessionId {
        SessionId::generate()
    }

    /// Resolve an optional per-call override into a time delta.
    ///
    /// Zero seconds is rejected rather than treated as already expired, and so
    /// is any value whose deadline `now + ttl` overflows a timestamp.
    pub fn ttl(&self, expiration: Option<u64>) -> StorageResult<TimeDelta> {
        resolve(expiration.unwrap_or(self.expiration)).map(|(ttl, _)| ttl)
    }

    /// Absolute expiry for an optional per-call override, checked like [`ttl`](Self::ttl)
    pub fn deadline(&self, expiration: Option<u64>) -> StorageResult<DateTime<Utc>> {
        resolve(expiration.unwrap_or(self.expiration)).map(|(_, deadline)| deadline)
    }
}

impl Default for KeyNamespace {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            expiration: DEFAULT_EXPIRATION_SECS,
        }
    }
}

fn resolve(secs: u64) -> StorageResult<(TimeDelta, DateTime<Utc>)> {
    if secs == 0 {
        return Err(StorageError::InvalidExpiration(
            "expiration must be at least one second".to_string(),
        ));
    }

    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl).map(|deadline| (ttl, deadline)))
        .ok_or_else(|| StorageError::InvalidExpiration(format!("{} seconds is out of range", secs)))
}
