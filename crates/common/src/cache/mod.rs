//! Shared key-value cache
//!
//! Provides:
//! - A process-wide cache seam, used for the ledger OAuth token
//! - A redis-backed implementation with namespaced keys
//! - An in-memory implementation for tests and single-process runs

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Shared key-value cache seam
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Get a value by key, `None` on miss or expiry
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value with a time-to-live in seconds
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check connectivity
    async fn ping(&self) -> Result<()>;
}

/// Redis cache client
pub struct RedisCache {
    connection: RwLock<MultiplexedConnection>,
    key_prefix: String,
}

impl RedisCache {
    /// Connect to redis and namespace every key under `key_prefix`
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| AppError::Cache {
            message: format!("failed to create redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Cache {
                message: format!("failed to connect to redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            key_prefix: key_prefix.to_string(),
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let value: Option<String> = conn.get(&full_key).await.map_err(|e| AppError::Cache {
            message: format!("failed to get key '{}': {}", full_key, e),
        })?;

        match &value {
            Some(_) => debug!(key = %full_key, "Cache hit"),
            None => debug!(key = %full_key, "Cache miss"),
        }
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let _: () = conn
            .set_ex(&full_key, value, ttl_secs)
            .await
            .map_err(|e| AppError::Cache {
                message: format!("failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs, "Cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let deleted: i32 = conn.del(&full_key).await.map_err(|e| AppError::Cache {
            message: format!("failed to delete key '{}': {}", full_key, e),
        })?;

        debug!(key = %full_key, deleted = deleted > 0, "Cache delete");
        Ok(deleted > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::Cache {
                message: format!("redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// In-memory cache with expiry, for tests and single-process deployments
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).and_then(|(value, deadline)| {
            if Instant::now() < *deadline {
                Some(value.clone())
            } else {
                None
            }
        }))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Cache key builder helpers
pub mod keys {
    /// Key under which the ledger bearer token is shared between workers
    pub fn ledger_token() -> String {
        "ledger:access_token".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builders() {
        assert_eq!(keys::ledger_token(), "ledger:access_token");
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let cache = InMemoryCache::new();
        cache.set_with_ttl("token", "abc", 60).await.unwrap();
        assert_eq!(cache.get("token").await.unwrap().as_deref(), Some("abc"));

        assert!(cache.delete("token").await.unwrap());
        assert!(cache.get("token").await.unwrap().is_none());
        assert!(!cache.delete("token").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_expiry() {
        let cache = InMemoryCache::new();
        // Zero TTL expires immediately
        cache.set_with_ttl("token", "abc", 0).await.unwrap();
        assert!(cache.get("token").await.unwrap().is_none());
    }
}
