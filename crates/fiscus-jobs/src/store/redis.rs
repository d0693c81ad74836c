//! Redis-backed store implementation.

use super::StoreBackend;
use crate::config::RedisConfig;
use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

/// Create a Redis connection pool.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!("Creating Redis connection pool for job queue...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {e}")))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {e}")))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis store backend.
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Wrap an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl StoreBackend for RedisStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zpop_min(&self, key: &str) -> JobResult<Option<(String, f64)>> {
        let mut conn = self.conn().await?;
        let popped: Vec<(String, f64)> = conn.zpopmin(key, 1).await?;
        Ok(popped.into_iter().next())
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> JobResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.zrangebyscore(key, min, max).await?;
        Ok(members)
    }

    async fn zrem(&self, key: &str, member: &str) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    async fn lpush(&self, key: &str, value: &str) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.lpush(key, value).await?;
        Ok(len)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> JobResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let values: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(values)
    }

    async fn lrem(&self, key: &str, value: &str) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.lrem(key, 0, value).await?;
        Ok(removed)
    }

    async fn llen(&self, key: &str) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.llen(key).await?;
        Ok(len)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.ltrim(key, start, stop).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> JobResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> JobResult<()> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let result: Option<String> = match ttl {
            Some(ttl) => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async(&mut *conn)
                    .await?
            }
            None => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .query_async(&mut *conn)
                    .await?
            }
        };
        Ok(result.is_some())
    }

    async fn incr(&self, key: &str) -> JobResult<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(key, 1i64).await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn publish(&self, channel: &str, message: &str) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.publish(channel, message).await?;
        Ok(())
    }

    async fn ping(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }
}
