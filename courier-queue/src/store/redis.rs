//! Redis-backed store.
//!
//! `LPOP` gives the atomic pop the at-least-once contract relies on; the
//! connection manager transparently reconnects after network hiccups, so a
//! transient outage surfaces as `QueueError::Unavailable` rather than a
//! poisoned handle.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use courier_common::config::RedisConfig;

use crate::error::QueueError;
use crate::store::Store;

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects to the configured Redis instance.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] when the server cannot be
    /// reached.
    pub async fn connect(config: &RedisConfig) -> Result<Self, QueueError> {
        let client = Client::open(config.url())?;
        let manager = ConnectionManager::new(client).await?;
        tracing::debug!(host = %config.host, port = config.port, db = config.db, "connected to redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn push_back(&self, key: &str, value: String) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: usize = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, QueueError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.lpop(key, None).await?;
        Ok(value)
    }

    async fn len(&self, key: &str) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let count: usize = conn.llen(key).await?;
        Ok(count)
    }

    async fn range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, QueueError> {
        let mut conn = self.manager.clone();
        let values: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(values)
    }

    async fn remove_value(&self, key: &str, value: &str) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let removed: usize = conn.lrem(key, 1, value).await?;
        Ok(removed)
    }

    async fn delete(&self, key: &str) -> Result<bool, QueueError> {
        let mut conn = self.manager.clone();
        let deleted: usize = conn.del(key).await?;
        Ok(deleted > 0)
    }
}
