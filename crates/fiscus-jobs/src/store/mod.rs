//! Key/value store adapter.
//!
//! The queue core talks to its backing store through [`StoreBackend`]:
//! atomic scored-set and list operations, strings with TTL, counters, and
//! a pub-sub channel for queue lifecycle events. The production backend is
//! Redis; tests run on the in-memory backend.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::{create_pool, RedisStore};

use crate::error::JobResult;
use async_trait::async_trait;
use std::time::Duration;

/// Backend contract consumed by queues, the DLQ, and suppression windows.
///
/// All operations must be atomic with respect to concurrent callers.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    // ---- scored sets (main/delayed/active queues) ----

    /// Add or update a member with the given score.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> JobResult<()>;

    /// Atomically pop the member with the lowest score.
    async fn zpop_min(&self, key: &str) -> JobResult<Option<(String, f64)>>;

    /// Members with scores in `[min, max]`, ascending.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> JobResult<Vec<String>>;

    /// Remove a member. Returns true if it existed.
    async fn zrem(&self, key: &str, member: &str) -> JobResult<bool>;

    /// Member count.
    async fn zcard(&self, key: &str) -> JobResult<u64>;

    // ---- lists (history, DLQ) ----

    /// Push a value to the head. Returns the new length.
    async fn lpush(&self, key: &str, value: &str) -> JobResult<u64>;

    /// Range of values, 0-based inclusive indexes (negative from the tail).
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> JobResult<Vec<String>>;

    /// Remove occurrences of a value. Returns the number removed.
    async fn lrem(&self, key: &str, value: &str) -> JobResult<u64>;

    /// List length.
    async fn llen(&self, key: &str) -> JobResult<u64>;

    /// Trim the list to `[start, stop]`.
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> JobResult<()>;

    // ---- strings and counters ----

    /// Get a string value.
    async fn get(&self, key: &str) -> JobResult<Option<String>>;

    /// Set a string value with optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> JobResult<()>;

    /// Set only if absent, with optional TTL. Returns true if set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> JobResult<bool>;

    /// Increment a counter, creating it at zero.
    async fn incr(&self, key: &str) -> JobResult<i64>;

    /// Delete a key. Returns true if it existed.
    async fn del(&self, key: &str) -> JobResult<bool>;

    /// Key existence.
    async fn exists(&self, key: &str) -> JobResult<bool>;

    // ---- pub-sub and health ----

    /// Publish a message to a channel. Delivery is fire-and-forget.
    async fn publish(&self, channel: &str, message: &str) -> JobResult<()>;

    /// Round-trip health check.
    async fn ping(&self) -> JobResult<()>;
}

/// Key builder producing the persisted state layout.
#[derive(Debug, Clone)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    /// Create a new key builder with the given namespace prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Main job set for a queue (scored by priority and enqueue time).
    pub fn queue(&self, name: &str) -> String {
        format!("{}:queue:{}", self.prefix, name)
    }

    /// Delayed jobs for a queue (scored by eligibility time).
    pub fn delayed(&self, name: &str) -> String {
        format!("{}:queue:{}:delayed", self.prefix, name)
    }

    /// Active jobs for a queue (scored by lease deadline).
    pub fn active(&self, name: &str) -> String {
        format!("{}:queue:{}:active", self.prefix, name)
    }

    /// Bounded completed-history list.
    pub fn completed(&self, name: &str) -> String {
        format!("{}:queue:{}:completed", self.prefix, name)
    }

    /// Bounded failed-history list.
    pub fn failed(&self, name: &str) -> String {
        format!("{}:queue:{}:failed", self.prefix, name)
    }

    /// Paused flag (0/1).
    pub fn paused(&self, name: &str) -> String {
        format!("{}:queue:{}:paused", self.prefix, name)
    }

    /// Pub-sub channel for queue lifecycle events.
    pub fn events(&self, name: &str) -> String {
        format!("{}:events:{}", self.prefix, name)
    }

    /// Dead-letter entry list.
    pub fn dlq_jobs(&self) -> String {
        format!("{}:dlq:jobs", self.prefix)
    }

    /// Producer-id dedup marker.
    pub fn unique(&self, job_id: &str) -> String {
        format!("{}:unique:{}", self.prefix, job_id)
    }

    /// Recurring-schedule metadata record.
    pub fn recurring(&self, name: &str) -> String {
        format!("{}:recurring:{}", self.prefix, name)
    }

    /// Notification suppression marker.
    pub fn suppression(&self, scope: &str, subject: &str) -> String {
        format!("{}:suppress:{}:{}", self.prefix, scope, subject)
    }
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::new("fiscus:jobs")
    }
}
