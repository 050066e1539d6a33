//! # sessionstore - Session State Storage for Rust
//!
//! `sessionstore` keeps per-session state (an opaque JSON payload with an
//! expiry) behind one async trait, with interchangeable backends:
//!
//! - 🧠 **Memory**: process-local map with optional background sweeping
//! - ⚡ **Redis**: native TTL, `ConnectionManager`-based client (`redis-storage`)
//! - 📦 **Memcached**: native TTL through the `memcache` client (`memcached-storage`)
//! - 🗄️ **Database**: SQLite or PostgreSQL via `sqlx` (`database-storage`, `postgres-storage`)
//! - 🔀 **Hybrid**: a cache tier in front of a database, database as source of truth
//!
//! ## Quick Start
//!
//! ```
//! use sessionstore::{open_store, SessionStore, SessionStoreExt, StorageConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Login {
//!     user: String,
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = open_store("memory", &StorageConfig::new()).await?;
//!
//! let id = store
//!     .create_as(&Login { user: "alice".into() }, None, Some(60))
//!     .await?;
//! let login: Option<Login> = store.get_as(&id).await?;
//! assert_eq!(login, Some(Login { user: "alice".into() }));
//!
//! assert!(store.delete(&id).await?);
//! assert!(!store.exists(&id).await?);
//! store.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Hybrid Backend
//!
//! ```no_run
//! use sessionstore::{open_store, StorageConfig};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StorageConfig::new()
//!     .with("prefix", "admin:")
//!     .with("url", "redis://localhost:6379/0")
//!     .with("database", json!({"url": "postgres://localhost/app"}));
//! let store = open_store("hybrid", &config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        open_store(backend, StorageConfig)    │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!              Arc<dyn SessionStore>
//!    ┌─────────┬─────────┬──────────┬──────────┐
//!    │ Memory  │  Redis  │Memcached │ Database │
//!    └─────────┴────┬────┴────┬─────┴────┬─────┘
//!                   │  Hybrid │          │
//!                   └──cache──┘─durable──┘
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: the [`SessionStore`] trait and every backend
//! - [`factory`]: backend selection from a name and a configuration bag
//! - [`config`]: the configuration bag and per-backend settings
//! - [`namespace`]: key prefixing, id generation and expiration rules
//! - [`session`]: the stored record
//! - [`error`]: error types and result aliases
//!
//! ## Expiration
//!
//! Expirations are whole seconds. Zero is rejected with
//! [`StorageError::InvalidExpiration`]; an expired session reads exactly like
//! one that never existed.
//!
//! ## License
//!
//! Licensed under either of Apache License 2.0 or MIT license at your option.

// Core type definitions
pub mod types;

// Error types
pub mod error;

// Key namespacing
pub mod namespace;

// Stored records
pub mod session;

// Configuration bag
pub mod config;

// Storage backends
pub mod storage;

// Backend selection
pub mod factory;

pub use config::{
    CommonConfig, DatabaseConfig, MemcachedConfig, MemoryConfig, RedisConfig, StorageConfig,
};
pub use error::{StorageError, StorageResult};
pub use factory::{open_backend, open_store, Backend, CacheBackend};
pub use namespace::{KeyNamespace, DEFAULT_EXPIRATION_SECS, DEFAULT_PREFIX};
pub use session::SessionRecord;
pub use storage::hybrid::HybridSessionStore;
pub use storage::memory::MemorySessionStore;
pub use storage::{SessionStore, SessionStoreExt};
pub use types::SessionId;

#[cfg(feature = "database-storage")]
pub use storage::database::DatabaseSessionStore;

#[cfg(feature = "memcached-storage")]
pub use storage::memcached::MemcachedSessionStore;

#[cfg(feature = "redis-storage")]
pub use storage::redis::RedisSessionStore;
