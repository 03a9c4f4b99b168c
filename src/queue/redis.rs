// Redis list queue backend, the production transport between stages.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;

use super::{Queue, QueueError};

/// Build a Redis connection pool and verify it answers.
pub async fn connect(url: &str, pool_size: usize) -> Result<Pool, QueueError> {
    let pool = PoolConfig::from_url(url)
        .builder()
        .map_err(|e| QueueError::Connect(e.to_string()))?
        .max_size(pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| QueueError::Connect(e.to_string()))?;

    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    tracing::info!(url = %url, "connected to redis");

    Ok(pool)
}

/// FIFO queue on a Redis list: LPUSH to append, RPOP to consume.
pub struct RedisQueue {
    name: String,
    /// Full list key, `<namespace>:<name>`.
    key: String,
    pool: Pool,
}

impl RedisQueue {
    pub fn new(pool: Pool, namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            key: format!("{namespace}:{name}"),
            pool,
        }
    }

    /// Full Redis key backing this queue.
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl Queue for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, message: String) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        conn.lpush::<_, _, ()>(&self.key, message).await?;
        Ok(())
    }

    async fn pop(&self, count: usize) -> Vec<String> {
        let Some(count) = NonZeroUsize::new(count) else {
            return Vec::new();
        };
        let result: Result<Vec<String>, QueueError> = async {
            let mut conn = self.pool.get().await?;
            Ok(conn.rpop(&self.key, Some(count)).await?)
        }
        .await;
        match result {
            Ok(messages) => messages,
            Err(error) => {
                tracing::warn!(queue = %self.name, error = %error, "pop failed");
                Vec::new()
            }
        }
    }

    async fn size(&self) -> usize {
        let result: Result<usize, QueueError> = async {
            let mut conn = self.pool.get().await?;
            Ok(conn.llen(&self.key).await?)
        }
        .await;
        match result {
            Ok(len) => len,
            Err(error) => {
                tracing::warn!(queue = %self.name, error = %error, "size check failed");
                0
            }
        }
    }

    // Redis lists grow without a cap.
    fn capacity(&self) -> usize {
        0
    }
}

// ============================================================================
// Tests
// ============================================================================
