//! Fiscus Jobs - Background Work Subsystem
//!
//! A durable, prioritized, retry-capable job runner backed by a shared
//! key/value store, with:
//! - Typed job envelopes with serde serialization
//! - A fixed set of named queues with per-queue retry/backoff policy
//! - Worker pools with configurable per-queue concurrency
//! - Exponential backoff and a dead-letter store for exhausted jobs
//! - A cron scheduler feeding periodic batch work through the same queues
//! - Graceful drain and runtime administration (pause/resume/clear/retry)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Cron Scheduler ──┐                                          │
//! │  HTTP producers ──┴──► Queue Manager (accepting-jobs gate)   │
//! │                              │                               │
//! │                              ▼                               │
//! │        ┌──────────── KV Store Backend ────────────┐          │
//! │        │  main set │ delayed set │ active leases  │          │
//! │        └───────────────────┬────────────────────--┘          │
//! │                            ▼                                 │
//! │                      Worker Pools                            │
//! │                 (one per queue, bounded)                     │
//! │                     │            │                           │
//! │                     ▼            ▼                           │
//! │               Processors   Dead-Letter Store                 │
//! │                     │            │                           │
//! │                     └── Trace Sink (check-ins, exceptions)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-least-once: processors must be idempotent. Ordering
//! within a queue is strict priority, FIFO within a priority, honoring
//! per-job delay; there is no ordering across queues.

pub mod config;
pub mod dlq;
pub mod error;
pub mod job;
pub mod manager;
pub mod metrics;
pub mod processors;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use config::JobsConfig;
pub use dlq::{DeadLetterEntry, DeadLetterStats, DeadLetterStore};
pub use error::{JobError, JobResult};
pub use job::{
    EmailPriority, JobContext, JobEnvelope, JobId, JobKind, JobPayload, LastError,
    PropertyValuationRequest,
};
pub use manager::{Criticality, QueueDefinition, QueueManager, QUEUE_DEFINITIONS};
pub use metrics::{register_metrics, JobMetrics, SchedulerMetrics};
pub use queue::{FailureDisposition, Queue, QueueCounts, QueueEvent, QueuePolicy};
pub use retry::BackoffPolicy;
pub use scheduler::{
    build_schedules, CronScheduler, Schedule, ScheduleDeps, POPULAR_CRYPTO_SYMBOLS,
};
pub use store::{create_pool, MemoryStore, RedisStore, StoreBackend, StoreKeys};
pub use worker::{Processor, WorkerPool, WorkerPoolStats};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::job::{JobContext, JobKind, JobPayload};
    pub use crate::manager::QueueManager;
    pub use crate::queue::QueueEvent;
    pub use crate::worker::Processor;
    pub use crate::{JobError, JobId, JobResult};
}
