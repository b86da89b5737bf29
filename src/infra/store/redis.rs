//! Redis store backend.
//!
//! Uses `redis::aio::ConnectionManager` for async multiplexed connections with
//! automatic reconnection. Blocking pops run on their own connection so they
//! never stall the commands issued by submitters.

use async_trait::async_trait;
use tracing::debug;

use crate::core::error::StoreError;
use crate::core::store::StoreBackend;
use crate::util::telemetry::redact_url;

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisBackend {
    connection_manager: redis::aio::ConnectionManager,
    pop_connection: redis::aio::ConnectionManager,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("connection_manager", &"ConnectionManager")
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connect to the Redis server at `url`.
    pub async fn from_url(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            StoreError::Persistence(format!("Failed to create Redis client: {e}"))
        })?;

        let connection_manager = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::Persistence(format!("Failed to connect to Redis: {e}")))?;
        let pop_connection = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Persistence(format!("Failed to connect to Redis: {e}")))?;

        debug!(url = %redact_url(url), "Redis store connected");

        Ok(Self {
            connection_manager,
            pop_connection,
        })
    }

    /// Check the server answers `PING`.
    pub async fn health_check(&self) -> Result<bool, StoreError> {
        let mut conn = self.connection_manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Persistence(format!("Redis PING failed: {e}")))?;
        Ok(pong == "PONG")
    }
}

#[async_trait]
impl StoreBackend for RedisBackend {
    async fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StoreError> {
        let mut conn = self.connection_manager.clone();
        let created: bool = redis::cmd("SETNX")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Persistence(format!("Redis SETNX failed: {e}")))?;
        debug!(key = key, created = created, "SETNX");
        Ok(created)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Persistence(format!("Redis SET failed: {e}")))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Persistence(format!("Redis GET failed: {e}")))
    }

    async fn push_head(&self, list: &str, value: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("LPUSH")
            .arg(list)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Persistence(format!("Redis LPUSH failed: {e}")))
    }

    async fn blocking_pop_tail(&self, list: &str) -> Result<String, StoreError> {
        let mut conn = self.pop_connection.clone();
        let (_, value): (String, String) = redis::cmd("BRPOP")
            .arg(list)
            .arg(0)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Persistence(format!("Redis BRPOP failed: {e}")))?;
        Ok(value)
    }

    async fn list_len(&self, list: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("LLEN")
            .arg(list)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Persistence(format!("Redis LLEN failed: {e}")))
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("SADD")
            .arg(set)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Persistence(format!("Redis SADD failed: {e}")))
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("SREM")
            .arg(set)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Persistence(format!("Redis SREM failed: {e}")))
    }

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("SISMEMBER")
            .arg(set)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Persistence(format!("Redis SISMEMBER failed: {e}")))
    }

    async fn set_len(&self, set: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("SCARD")
            .arg(set)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Persistence(format!("Redis SCARD failed: {e}")))
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("SMEMBERS")
            .arg(set)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Persistence(format!("Redis SMEMBERS failed: {e}")))
    }
}
