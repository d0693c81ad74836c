//! Named job queue over the store backend.
//!
//! One `Queue` owns the scored sets and history lists for a single named
//! channel: the main set (scored by priority and enqueue time), the delayed
//! set (scored by eligibility time), the active set (scored by lease
//! deadline for stall detection), and the bounded completed/failed history
//! lists.

use crate::error::{JobError, JobResult};
use crate::job::{JobEnvelope, JobId};
use crate::retry::BackoffPolicy;
use crate::store::{StoreBackend, StoreKeys};
use fiscus_core::{Clock, SharedClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Per-queue policy resolved at provisioning.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    /// Retry schedule (max attempts + base delay).
    pub backoff: BackoffPolicy,

    /// Concurrent processors bound to this queue.
    pub concurrency: usize,

    /// Completed-history retention (FIFO eviction past this count).
    pub remove_on_complete_window: usize,

    /// Failed-history retention.
    pub remove_on_fail_window: usize,

    /// Lease length for active jobs; expired leases are re-offered.
    pub stall_window: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            concurrency: 5,
            remove_on_complete_window: 100,
            remove_on_fail_window: 50,
            stall_window: Duration::from_secs(30),
        }
    }
}

/// Lifecycle events emitted to subscribed listeners and the pub-sub channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Completed { job_id: JobId },
    Failed { job_id: JobId, reason: String },
    Stalled { job_id: JobId },
    Error { message: String },
}

/// What happened to a failed job.
#[derive(Debug)]
pub enum FailureDisposition {
    /// Attempts remain; the job was re-enqueued with this delay.
    Retried { next_delay: Duration },

    /// Attempts exhausted; the caller promotes the envelope to the DLQ.
    Exhausted(JobEnvelope),
}

/// Per-queue counts reported by the admin API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// A named, priority-ordered, persistent job buffer.
pub struct Queue {
    name: String,
    policy: QueuePolicy,
    store: Arc<dyn StoreBackend>,
    keys: StoreKeys,
    clock: SharedClock,
    events_tx: broadcast::Sender<QueueEvent>,
}

impl Queue {
    /// Create a queue over the given store.
    pub fn new(
        name: impl Into<String>,
        policy: QueuePolicy,
        store: Arc<dyn StoreBackend>,
        keys: StoreKeys,
        clock: SharedClock,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            name: name.into(),
            policy,
            store,
            keys,
            clock,
            events_tx,
        }
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue policy.
    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events_tx.subscribe()
    }

    /// Priority score for the main set: higher priority sorts first,
    /// FIFO by enqueue time within a priority.
    fn priority_score(priority: i32, enqueued_at_ms: i64) -> f64 {
        -(f64::from(priority)) * 1_000_000_000_000.0 + enqueued_at_ms as f64
    }

    async fn emit(&self, event: QueueEvent) {
        let _ = self.events_tx.send(event.clone());
        match serde_json::to_string(&event) {
            Ok(json) => {
                if let Err(e) = self.store.publish(&self.keys.events(&self.name), &json).await {
                    warn!(queue = %self.name, error = %e, "Failed to publish queue event");
                }
            }
            Err(e) => {
                warn!(queue = %self.name, error = %e, "Failed to serialize queue event");
            }
        }
    }

    /// Store a job. Delayed jobs land in the delayed set until eligible.
    pub async fn push(&self, envelope: &JobEnvelope) -> JobResult<()> {
        let json = envelope.to_json()?;
        let now = self.clock.now();

        if envelope.eligible_at() > now {
            let score = envelope.eligible_at().timestamp_millis() as f64;
            self.store
                .zadd(&self.keys.delayed(&self.name), &json, score)
                .await?;
            debug!(
                queue = %self.name,
                job_id = %envelope.id,
                eligible_at = %envelope.eligible_at(),
                "Enqueued delayed job"
            );
        } else {
            let score =
                Self::priority_score(envelope.priority, envelope.enqueued_at.timestamp_millis());
            self.store
                .zadd(&self.keys.queue(&self.name), &json, score)
                .await?;
            debug!(
                queue = %self.name,
                job_id = %envelope.id,
                priority = envelope.priority,
                "Enqueued job"
            );
        }

        Ok(())
    }

    /// Remove a member from the main set by its stored JSON.
    pub(crate) async fn remove_member(&self, member_json: &str) -> JobResult<bool> {
        self.store
            .zrem(&self.keys.queue(&self.name), member_json)
            .await
    }

    /// Move delayed jobs whose eligibility has passed into the main set.
    pub async fn promote_due(&self) -> JobResult<u64> {
        let now_ms = self.clock.now_millis();
        let due = self
            .store
            .zrange_by_score(&self.keys.delayed(&self.name), 0.0, now_ms as f64)
            .await?;

        let mut moved = 0u64;
        for member in due {
            if !self
                .store
                .zrem(&self.keys.delayed(&self.name), &member)
                .await?
            {
                // Another consumer promoted it first.
                continue;
            }
            match JobEnvelope::from_json(&member) {
                Ok(envelope) => {
                    let score = Self::priority_score(
                        envelope.priority,
                        envelope.enqueued_at.timestamp_millis(),
                    );
                    self.store
                        .zadd(&self.keys.queue(&self.name), &member, score)
                        .await?;
                    moved += 1;
                }
                Err(e) => {
                    self.emit(QueueEvent::Error {
                        message: format!("undecodable delayed job dropped: {e}"),
                    })
                    .await;
                }
            }
        }

        if moved > 0 {
            debug!(queue = %self.name, count = moved, "Promoted delayed jobs");
        }
        Ok(moved)
    }

    /// Re-offer active jobs whose lease deadline has passed.
    pub async fn reclaim_stalled(&self) -> JobResult<u64> {
        let now_ms = self.clock.now_millis();
        let expired = self
            .store
            .zrange_by_score(&self.keys.active(&self.name), 0.0, now_ms as f64)
            .await?;

        let mut reclaimed = 0u64;
        for member in expired {
            if !self
                .store
                .zrem(&self.keys.active(&self.name), &member)
                .await?
            {
                continue;
            }
            match JobEnvelope::from_json(&member) {
                Ok(envelope) => {
                    let score = Self::priority_score(
                        envelope.priority,
                        envelope.enqueued_at.timestamp_millis(),
                    );
                    self.store
                        .zadd(&self.keys.queue(&self.name), &member, score)
                        .await?;
                    warn!(queue = %self.name, job_id = %envelope.id, "Reclaimed stalled job");
                    self.emit(QueueEvent::Stalled {
                        job_id: envelope.id,
                    })
                    .await;
                    reclaimed += 1;
                }
                Err(e) => {
                    self.emit(QueueEvent::Error {
                        message: format!("undecodable stalled job dropped: {e}"),
                    })
                    .await;
                }
            }
        }

        Ok(reclaimed)
    }

    /// Hand the next eligible job to a worker.
    ///
    /// Returns `None` when the queue is paused or empty. The returned job
    /// is moved to the active set under a stall lease.
    pub async fn next_job(&self) -> JobResult<Option<JobEnvelope>> {
        if self.is_paused().await? {
            return Ok(None);
        }

        self.promote_due().await?;
        self.reclaim_stalled().await?;

        loop {
            let Some((member, _score)) = self.store.zpop_min(&self.keys.queue(&self.name)).await?
            else {
                return Ok(None);
            };

            match JobEnvelope::from_json(&member) {
                Ok(mut envelope) => {
                    let now = self.clock.now();
                    if envelope.first_picked_at.is_none() {
                        envelope.first_picked_at = Some(now);
                    }
                    let lease_deadline = now
                        + chrono::Duration::milliseconds(
                            self.policy.stall_window.as_millis() as i64
                        );
                    self.store
                        .zadd(
                            &self.keys.active(&self.name),
                            &envelope.to_json()?,
                            lease_deadline.timestamp_millis() as f64,
                        )
                        .await?;

                    debug!(
                        queue = %self.name,
                        job_id = %envelope.id,
                        attempt = envelope.attempts_made + 1,
                        "Dequeued job"
                    );
                    return Ok(Some(envelope));
                }
                Err(e) => {
                    self.emit(QueueEvent::Error {
                        message: format!("undecodable job dropped: {e}"),
                    })
                    .await;
                }
            }
        }
    }

    /// Record a successful run: drop the active lease, append to the
    /// completed history, emit `completed`.
    pub async fn complete(&self, envelope: &JobEnvelope) -> JobResult<()> {
        let member = envelope.to_json()?;
        self.store
            .zrem(&self.keys.active(&self.name), &member)
            .await?;

        let history_key = self.keys.completed(&self.name);
        self.store.lpush(&history_key, &member).await?;
        self.store
            .ltrim(
                &history_key,
                0,
                self.policy.remove_on_complete_window as isize - 1,
            )
            .await?;

        self.emit(QueueEvent::Completed {
            job_id: envelope.id.clone(),
        })
        .await;
        Ok(())
    }

    /// Record a failed run.
    ///
    /// With attempts remaining the job is re-enqueued into the delayed set
    /// with exponential backoff; otherwise the updated envelope is returned
    /// for dead-letter promotion.
    pub async fn fail(
        &self,
        envelope: JobEnvelope,
        error: &JobError,
    ) -> JobResult<FailureDisposition> {
        let active_member = envelope.to_json()?;
        self.store
            .zrem(&self.keys.active(&self.name), &active_member)
            .await?;

        let prior_failures = envelope.attempts_made;
        let mut updated = envelope;
        updated.record_failure(error, self.clock.now());

        let history_key = self.keys.failed(&self.name);
        self.store.lpush(&history_key, &updated.to_json()?).await?;
        self.store
            .ltrim(
                &history_key,
                0,
                self.policy.remove_on_fail_window as isize - 1,
            )
            .await?;

        self.emit(QueueEvent::Failed {
            job_id: updated.id.clone(),
            reason: error.to_string(),
        })
        .await;

        if self.policy.backoff.allows_retry(updated.attempts_made) {
            let next_delay = self.policy.backoff.delay_for(prior_failures);
            let eligible_at =
                self.clock.now() + chrono::Duration::milliseconds(next_delay.as_millis() as i64);
            self.store
                .zadd(
                    &self.keys.delayed(&self.name),
                    &updated.to_json()?,
                    eligible_at.timestamp_millis() as f64,
                )
                .await?;

            debug!(
                queue = %self.name,
                job_id = %updated.id,
                attempt = updated.attempts_made,
                retry_in_ms = next_delay.as_millis() as u64,
                "Scheduled job retry"
            );
            Ok(FailureDisposition::Retried { next_delay })
        } else {
            Ok(FailureDisposition::Exhausted(updated))
        }
    }

    /// Pause consumption. Producers keep enqueueing.
    pub async fn pause(&self) -> JobResult<()> {
        self.store
            .set(&self.keys.paused(&self.name), "1", None)
            .await
    }

    /// Resume consumption.
    pub async fn resume(&self) -> JobResult<()> {
        self.store.del(&self.keys.paused(&self.name)).await?;
        Ok(())
    }

    /// Whether consumers are suspended.
    pub async fn is_paused(&self) -> JobResult<bool> {
        Ok(self
            .store
            .get(&self.keys.paused(&self.name))
            .await?
            .as_deref()
            == Some("1"))
    }

    /// Delete all waiting and delayed jobs. Returns the number removed.
    pub async fn clear(&self) -> JobResult<u64> {
        let waiting = self.store.zcard(&self.keys.queue(&self.name)).await?;
        let delayed = self.store.zcard(&self.keys.delayed(&self.name)).await?;
        self.store.del(&self.keys.queue(&self.name)).await?;
        self.store.del(&self.keys.delayed(&self.name)).await?;
        Ok(waiting + delayed)
    }

    /// Re-enqueue everything in the failed history with a fresh attempt
    /// budget. Returns the number re-enqueued.
    pub async fn retry_failed(&self) -> JobResult<u64> {
        let history_key = self.keys.failed(&self.name);
        let entries = self.store.lrange(&history_key, 0, -1).await?;
        self.store.del(&history_key).await?;

        let mut retried = 0u64;
        for member in entries {
            match JobEnvelope::from_json(&member) {
                Ok(mut envelope) => {
                    envelope.attempts_made = 0;
                    let score = Self::priority_score(
                        envelope.priority,
                        envelope.enqueued_at.timestamp_millis(),
                    );
                    self.store
                        .zadd(&self.keys.queue(&self.name), &envelope.to_json()?, score)
                        .await?;
                    retried += 1;
                }
                Err(e) => {
                    warn!(queue = %self.name, error = %e, "Skipping undecodable failed-history entry");
                }
            }
        }
        Ok(retried)
    }

    /// Current counts across all job states.
    pub async fn counts(&self) -> JobResult<QueueCounts> {
        Ok(QueueCounts {
            waiting: self.store.zcard(&self.keys.queue(&self.name)).await?,
            active: self.store.zcard(&self.keys.active(&self.name)).await?,
            completed: self.store.llen(&self.keys.completed(&self.name)).await?,
            failed: self.store.llen(&self.keys.failed(&self.name)).await?,
            delayed: self.store.zcard(&self.keys.delayed(&self.name)).await?,
        })
    }
}
