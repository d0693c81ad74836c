//! Dead-letter store.
//!
//! Terminal storage for jobs that exhausted every attempt. Entries persist
//! until explicitly cleared, pruned, or retried. Every operation degrades
//! to logging with a zero-like result on store errors; the DLQ never takes
//! the caller down.

use crate::error::JobResult;
use crate::job::{JobEnvelope, JobId, JobKind, JobPayload};
use crate::store::{StoreBackend, StoreKeys};
use chrono::{DateTime, Utc};
use fiscus_core::{Clock, SharedClock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Persistent record of a permanently failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: JobId,
    pub original_queue: String,
    pub kind: JobKind,
    pub payload: JobPayload,
    pub failed_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub failed_at: DateTime<Utc>,
    /// Set when a retry is issued. Always >= `failed_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl DeadLetterEntry {
    /// Convert an exhausted envelope into a dead-letter entry.
    pub fn from_envelope(envelope: &JobEnvelope, failed_at: DateTime<Utc>) -> Self {
        let (failed_reason, stacktrace) = match &envelope.last_error {
            Some(err) => (err.message.clone(), err.stack.clone()),
            None => ("unknown failure".to_string(), None),
        };
        Self {
            id: envelope.id.clone(),
            original_queue: envelope.queue.clone(),
            kind: envelope.kind(),
            payload: envelope.payload.clone(),
            failed_reason,
            stacktrace,
            attempts_made: envelope.attempts_made,
            max_attempts: envelope.max_attempts,
            failed_at,
            processed_at: None,
        }
    }
}

/// Aggregate DLQ statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeadLetterStats {
    pub total: u64,
    pub per_queue: HashMap<String, u64>,
    pub oldest_failed_at: Option<DateTime<Utc>>,
    pub newest_failed_at: Option<DateTime<Utc>>,
}

/// Persistent list of jobs that exhausted all attempts.
pub struct DeadLetterStore {
    store: Arc<dyn StoreBackend>,
    keys: StoreKeys,
    clock: SharedClock,
}

impl DeadLetterStore {
    /// Create a store over the shared backend.
    pub fn new(store: Arc<dyn StoreBackend>, keys: StoreKeys, clock: SharedClock) -> Self {
        Self { store, keys, clock }
    }

    /// Append an entry to the head of the DLQ list and write a visibility
    /// record into the dead-letter queue for inspection UIs.
    pub async fn push(&self, entry: &DeadLetterEntry) {
        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                warn!(job_id = %entry.id, error = %e, "Failed to serialize DLQ entry");
                return;
            }
        };

        if let Err(e) = self.store.lpush(&self.keys.dlq_jobs(), &json).await {
            warn!(job_id = %entry.id, error = %e, "Failed to persist DLQ entry");
            return;
        }

        // Visibility fan-out; never consumed automatically.
        let score = entry.failed_at.timestamp_millis() as f64;
        if let Err(e) = self
            .store
            .zadd(&self.keys.queue("dead-letter"), &json, score)
            .await
        {
            warn!(job_id = %entry.id, error = %e, "Failed to write DLQ visibility record");
        }

        warn!(
            job_id = %entry.id,
            queue = %entry.original_queue,
            attempts = entry.attempts_made,
            reason = %entry.failed_reason,
            "Job moved to dead-letter store"
        );
    }

    /// The head `limit` entries, newest first.
    pub async fn list(&self, limit: usize) -> Vec<DeadLetterEntry> {
        let members = match self
            .store
            .lrange(&self.keys.dlq_jobs(), 0, limit as isize - 1)
            .await
        {
            Ok(members) => members,
            Err(e) => {
                warn!(error = %e, "Failed to list DLQ entries");
                return Vec::new();
            }
        };

        members
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect()
    }

    /// Totals, per-queue counts, and failure time bounds.
    pub async fn stats(&self) -> DeadLetterStats {
        let entries = self.list(usize::MAX >> 1).await;

        let mut stats = DeadLetterStats {
            total: entries.len() as u64,
            ..DeadLetterStats::default()
        };
        for entry in &entries {
            *stats
                .per_queue
                .entry(entry.original_queue.clone())
                .or_default() += 1;
            stats.oldest_failed_at = match stats.oldest_failed_at {
                Some(oldest) => Some(oldest.min(entry.failed_at)),
                None => Some(entry.failed_at),
            };
            stats.newest_failed_at = match stats.newest_failed_at {
                Some(newest) => Some(newest.max(entry.failed_at)),
                None => Some(entry.failed_at),
            };
        }
        stats
    }

    /// Re-enqueue one entry into its original queue and remove it from the
    /// DLQ list. Returns true on success.
    pub async fn retry(&self, dlq_job_id: &JobId) -> bool {
        let members = match self.store.lrange(&self.keys.dlq_jobs(), 0, -1).await {
            Ok(members) => members,
            Err(e) => {
                warn!(job_id = %dlq_job_id, error = %e, "Failed to read DLQ for retry");
                return false;
            }
        };

        for member in members {
            let Ok(mut entry) = serde_json::from_str::<DeadLetterEntry>(&member) else {
                continue;
            };
            if entry.id != *dlq_job_id {
                continue;
            }

            let now = self.clock.now();
            entry.processed_at = Some(now);

            if !self.reenqueue(&entry, now).await {
                return false;
            }
            if let Err(e) = self.store.lrem(&self.keys.dlq_jobs(), &member).await {
                warn!(job_id = %dlq_job_id, error = %e, "Failed to remove retried DLQ entry");
                return false;
            }
            let _ = self
                .store
                .zrem(&self.keys.queue("dead-letter"), &member)
                .await;

            info!(
                job_id = %dlq_job_id,
                queue = %entry.original_queue,
                "Retried job from dead-letter store"
            );
            return true;
        }

        warn!(job_id = %dlq_job_id, "DLQ entry not found for retry");
        false
    }

    /// Retry every entry originating from one queue. Returns the count
    /// successfully re-enqueued.
    pub async fn retry_by_original_queue(&self, queue_name: &str) -> u64 {
        let ids: Vec<JobId> = self
            .list(usize::MAX >> 1)
            .await
            .into_iter()
            .filter(|entry| entry.original_queue == queue_name)
            .map(|entry| entry.id)
            .collect();

        let mut retried = 0u64;
        for id in ids {
            if self.retry(&id).await {
                retried += 1;
            }
        }
        retried
    }

    /// Delete all entries. Returns the number removed.
    pub async fn clear_all(&self) -> u64 {
        let count = match self.store.llen(&self.keys.dlq_jobs()).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to count DLQ entries for clear");
                return 0;
            }
        };
        if let Err(e) = self.store.del(&self.keys.dlq_jobs()).await {
            warn!(error = %e, "Failed to clear DLQ");
            return 0;
        }
        let _ = self.store.del(&self.keys.queue("dead-letter")).await;
        info!(count, "Cleared dead-letter store");
        count
    }

    /// Remove entries older than the given number of days. Returns the
    /// number removed.
    pub async fn prune(&self, older_than_days: u32) -> u64 {
        let cutoff = self.clock.now() - chrono::Duration::days(i64::from(older_than_days));

        let members = match self.store.lrange(&self.keys.dlq_jobs(), 0, -1).await {
            Ok(members) => members,
            Err(e) => {
                warn!(error = %e, "Failed to read DLQ for prune");
                return 0;
            }
        };

        let mut pruned = 0u64;
        for member in members {
            let Ok(entry) = serde_json::from_str::<DeadLetterEntry>(&member) else {
                continue;
            };
            if entry.failed_at < cutoff {
                match self.store.lrem(&self.keys.dlq_jobs(), &member).await {
                    Ok(removed) => {
                        let _ = self
                            .store
                            .zrem(&self.keys.queue("dead-letter"), &member)
                            .await;
                        pruned += removed;
                    }
                    Err(e) => {
                        warn!(job_id = %entry.id, error = %e, "Failed to prune DLQ entry");
                    }
                }
            }
        }

        if pruned > 0 {
            info!(count = pruned, older_than_days, "Pruned dead-letter store");
        }
        pruned
    }

    /// Build the retry envelope and add it to the original queue's main set.
    async fn reenqueue(&self, entry: &DeadLetterEntry, now: DateTime<Utc>) -> bool {
        let retry_id = format!("retry-{}-{}", entry.id, now.timestamp_millis());
        let envelope = JobEnvelope::new(
            JobId::from_string(retry_id),
            entry.original_queue.clone(),
            entry.payload.clone(),
            0,
            Duration::ZERO,
            entry.max_attempts,
            now,
        );

        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(job_id = %entry.id, error = %e, "Failed to serialize DLQ retry job");
                return false;
            }
        };

        // Score formula matches Queue::push for immediate jobs.
        let score = -(f64::from(envelope.priority)) * 1_000_000_000_000.0
            + envelope.enqueued_at.timestamp_millis() as f64;
        match self
            .store
            .zadd(&self.keys.queue(&entry.original_queue), &json, score)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %entry.id, error = %e, "Failed to re-enqueue DLQ entry");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use fiscus_core::{Clock, ManualClock};

    fn fixture() -> (DeadLetterStore, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::start_now());
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let dlq = DeadLetterStore::new(store.clone(), StoreKeys::new("test"), clock.clone());
        (dlq, store, clock)
    }

    fn entry(id: &str, queue: &str, failed_at: DateTime<Utc>) -> DeadLetterEntry {
        DeadLetterEntry {
            id: JobId::from(id),
            original_queue: queue.to_string(),
            kind: JobKind::SyncTransactions,
            payload: JobPayload::SyncTransactions {
                provider: "bitso".into(),
                user_id: "u-1".into(),
                connection_id: "c-1".into(),
                full_sync: false,
            },
            failed_reason: "boom".into(),
            stacktrace: None,
            attempts_made: 5,
            max_attempts: 5,
            failed_at,
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn test_push_and_list_newest_first() {
        let (dlq, _, clock) = fixture();
        dlq.push(&entry("j1", "sync-transactions", clock.now())).await;
        clock.advance(chrono::Duration::seconds(1));
        dlq.push(&entry("j2", "sync-transactions", clock.now())).await;

        let listed = dlq.list(100).await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id.as_str(), "j2");
        assert_eq!(listed[1].id.as_str(), "j1");
    }

    #[tokio::test]
    async fn test_stats() {
        let (dlq, _, clock) = fixture();
        let t0 = clock.now();
        dlq.push(&entry("j1", "sync-transactions", t0)).await;
        clock.advance(chrono::Duration::hours(2));
        dlq.push(&entry("j2", "esg-updates", clock.now())).await;

        let stats = dlq.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.per_queue.get("sync-transactions"), Some(&1));
        assert_eq!(stats.per_queue.get("esg-updates"), Some(&1));
        assert_eq!(stats.oldest_failed_at, Some(t0));
        assert_eq!(stats.newest_failed_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn test_retry_round_trip() {
        let (dlq, store, clock) = fixture();
        let original = entry("j1", "sync-transactions", clock.now());
        dlq.push(&original).await;

        assert!(dlq.retry(&JobId::from("j1")).await);

        // Entry removed from the DLQ list.
        assert!(dlq.list(100).await.is_empty());

        // Re-enqueued job carries the original payload byte-for-byte.
        let keys = StoreKeys::new("test");
        let members = store
            .zrange_by_score(&keys.queue("sync-transactions"), f64::MIN, f64::MAX)
            .await
            .unwrap();
        assert_eq!(members.len(), 1);
        let requeued = JobEnvelope::from_json(&members[0]).unwrap();
        assert_eq!(requeued.payload, original.payload);
        assert_eq!(requeued.kind(), original.kind);
        assert!(requeued.id.as_str().starts_with("retry-j1-"));
        assert_eq!(requeued.attempts_made, 0);
    }

    #[tokio::test]
    async fn test_retry_unknown_id_is_false() {
        let (dlq, _, _) = fixture();
        assert!(!dlq.retry(&JobId::from("missing")).await);
    }

    #[tokio::test]
    async fn test_retry_by_original_queue() {
        let (dlq, _, clock) = fixture();
        dlq.push(&entry("j1", "sync-transactions", clock.now())).await;
        dlq.push(&entry("j2", "sync-transactions", clock.now())).await;
        dlq.push(&entry("j3", "esg-updates", clock.now())).await;

        assert_eq!(dlq.retry_by_original_queue("sync-transactions").await, 2);
        let remaining = dlq.list(100).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id.as_str(), "j3");
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (dlq, _, clock) = fixture();
        dlq.push(&entry("j1", "sync-transactions", clock.now())).await;
        dlq.push(&entry("j2", "sync-transactions", clock.now())).await;

        assert_eq!(dlq.clear_all().await, 2);
        assert!(dlq.list(100).await.is_empty());
        assert_eq!(dlq.clear_all().await, 0);
    }

    #[tokio::test]
    async fn test_prune_removes_only_old_entries() {
        let (dlq, _, clock) = fixture();
        let old = clock.now() - chrono::Duration::days(45);
        dlq.push(&entry("old", "sync-transactions", old)).await;
        dlq.push(&entry("new", "sync-transactions", clock.now())).await;

        assert_eq!(dlq.prune(30).await, 1);
        let remaining = dlq.list(100).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id.as_str(), "new");
    }
}
