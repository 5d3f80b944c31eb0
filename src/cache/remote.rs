//! Remote key-value cache on Redis.
//!
//! # Design Decisions
//! - Connections come from a bb8 pool built in `start()`; calls before that fail
//!   with `NotStarted`
//! - `start()` pings the server so an unreachable store stops the process at boot
//! - Every entry is written with the same fixed expiration

use async_trait::async_trait;
use bb8_redis::bb8::Pool;
use bb8_redis::RedisConnectionManager;
use bytes::Bytes;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::cache::{CacheBackend, CacheError};
use crate::config::RedisCacheConfig;

#[derive(Debug)]
pub struct RemoteCache {
    config: RedisCacheConfig,
    pool: OnceCell<Pool<RedisConnectionManager>>,
}

impl RemoteCache {
    pub fn new(config: RedisCacheConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
        }
    }

    /// Key as stored in Redis.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn pool(&self) -> Result<&Pool<RedisConnectionManager>, CacheError> {
        self.pool.get().ok_or(CacheError::NotStarted)
    }
}

#[async_trait]
impl CacheBackend for RemoteCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn start(&self) -> Result<(), CacheError> {
        if self.pool.initialized() {
            return Ok(());
        }
        let manager = RedisConnectionManager::new(self.config.url.as_str())?;
        let pool = Pool::builder()
            .max_size(self.config.pool_size)
            .build(manager)
            .await?;
        {
            let mut conn = pool.get().await?;
            let pong: String = redis::cmd("PING").query_async(&mut *conn).await?;
            debug!(reply = %pong, "Redis answered ping");
        }
        if self.pool.set(pool).is_ok() {
            info!(url = %self.config.url, pool_size = self.config.pool_size, "Connected to Redis");
        }
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.pool()?.get().await?;
        let exists: bool = conn.exists(self.storage_key(key)).await?;
        Ok(exists)
    }

    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        let mut conn = self.pool()?.get().await?;
        let value: Option<Vec<u8>> = conn.get(self.storage_key(key)).await?;
        value
            .map(Bytes::from)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        let mut conn = self.pool()?.get().await?;
        let _: () = conn
            .set_ex(self.storage_key(key), &value[..], self.config.expiration_secs)
            .await?;
        Ok(())
    }
}
