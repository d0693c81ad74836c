//! Queue manager: lifecycle owner for all queues and the DLQ.
//!
//! Provisions the fixed queue set at startup, exposes the producer and
//! admin APIs, registers workers, and orchestrates the graceful drain.

use crate::config::JobsConfig;
use crate::dlq::DeadLetterStore;
use crate::error::{JobError, JobResult};
use crate::job::{EmailPriority, JobEnvelope, JobId, JobKind, JobPayload};
use crate::metrics::JobMetrics;
use crate::queue::{Queue, QueueCounts, QueuePolicy};
use crate::retry::BackoffPolicy;
use crate::store::{StoreBackend, StoreKeys};
use crate::worker::{Processor, WorkerPool};
use chrono::NaiveDate;
use fiscus_core::{Clock, SharedClock, TraceSink};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// TTL for producer-id dedup markers.
const DEDUP_TTL: Duration = Duration::from_secs(24 * 3600);

/// Drain poll cadence.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Queue criticality tier, mapped to a default priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Critical,
    High,
    Standard,
}

impl Criticality {
    /// Default priority for jobs on queues of this tier.
    pub fn default_priority(self) -> i32 {
        match self {
            Criticality::Critical => 100,
            Criticality::High => 50,
            Criticality::Standard => 10,
        }
    }
}

/// One row of the fixed provisioning table.
#[derive(Debug, Clone, Copy)]
pub struct QueueDefinition {
    pub name: &'static str,
    pub criticality: Criticality,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    /// Storage-only queues accept writes but never get workers.
    pub storage_only: bool,
}

/// The fixed set of queues provisioned at startup.
pub const QUEUE_DEFINITIONS: &[QueueDefinition] = &[
    QueueDefinition {
        name: "sync-transactions",
        criticality: Criticality::Critical,
        max_attempts: 5,
        base_backoff: Duration::from_secs(10),
        storage_only: false,
    },
    QueueDefinition {
        name: "email-notifications",
        criticality: Criticality::Critical,
        max_attempts: 5,
        base_backoff: Duration::from_secs(5),
        storage_only: false,
    },
    QueueDefinition {
        name: "categorize-transactions",
        criticality: Criticality::High,
        max_attempts: 4,
        base_backoff: Duration::from_secs(3),
        storage_only: false,
    },
    QueueDefinition {
        name: "valuation-snapshots",
        criticality: Criticality::High,
        max_attempts: 4,
        base_backoff: Duration::from_secs(3),
        storage_only: false,
    },
    QueueDefinition {
        name: "esg-updates",
        criticality: Criticality::Standard,
        max_attempts: 3,
        base_backoff: Duration::from_secs(3),
        storage_only: false,
    },
    QueueDefinition {
        name: "system-maintenance",
        criticality: Criticality::Standard,
        max_attempts: 3,
        base_backoff: Duration::from_secs(3),
        storage_only: false,
    },
    QueueDefinition {
        name: "property-valuation",
        criticality: Criticality::Standard,
        max_attempts: 3,
        base_backoff: Duration::from_secs(3),
        storage_only: false,
    },
    QueueDefinition {
        name: "dead-letter",
        criticality: Criticality::Standard,
        max_attempts: 1,
        base_backoff: Duration::from_secs(1),
        storage_only: true,
    },
];

/// Persisted metadata for a recurring registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecurringRecord {
    queue: String,
    cron: String,
    /// Last enqueued member, removed before the next repeat lands.
    last_member: String,
}

/// Lifecycle owner: creates queues, registers workers, exposes admin
/// operations, tracks accepting-jobs state, orchestrates graceful drain.
pub struct QueueManager {
    config: JobsConfig,
    store: Arc<dyn StoreBackend>,
    keys: StoreKeys,
    clock: SharedClock,
    sink: Arc<dyn TraceSink>,
    queues: HashMap<&'static str, Arc<Queue>>,
    definitions: HashMap<&'static str, QueueDefinition>,
    dlq: Arc<DeadLetterStore>,
    accepting: AtomicBool,
    registrations: RwLock<HashMap<&'static str, HashMap<JobKind, Arc<dyn Processor>>>>,
    pools: Mutex<Vec<Arc<WorkerPool>>>,
    pool_handles: Mutex<Vec<JoinHandle<JobResult<()>>>>,
}

impl QueueManager {
    /// Provision the fixed queue set over the given store.
    pub fn new(
        store: Arc<dyn StoreBackend>,
        clock: SharedClock,
        sink: Arc<dyn TraceSink>,
        config: JobsConfig,
    ) -> Self {
        let keys = StoreKeys::new(config.redis.key_prefix.clone());

        let mut queues = HashMap::new();
        let mut definitions = HashMap::new();
        for def in QUEUE_DEFINITIONS {
            let policy = QueuePolicy {
                backoff: BackoffPolicy::new(def.max_attempts, def.base_backoff),
                concurrency: config.worker.concurrency_for(def.name),
                remove_on_complete_window: config.queue.remove_on_complete_window,
                remove_on_fail_window: config.queue.remove_on_fail_window,
                stall_window: config.worker.stall_window(),
            };
            queues.insert(
                def.name,
                Arc::new(Queue::new(
                    def.name,
                    policy,
                    store.clone(),
                    keys.clone(),
                    clock.clone(),
                )),
            );
            definitions.insert(def.name, *def);
        }

        let dlq = Arc::new(DeadLetterStore::new(
            store.clone(),
            keys.clone(),
            clock.clone(),
        ));

        info!(queues = queues.len(), "Provisioned job queues");

        Self {
            config,
            store,
            keys,
            clock,
            sink,
            queues,
            definitions,
            dlq,
            accepting: AtomicBool::new(true),
            registrations: RwLock::new(HashMap::new()),
            pools: Mutex::new(Vec::new()),
            pool_handles: Mutex::new(Vec::new()),
        }
    }

    /// The dead-letter store.
    pub fn dead_letters(&self) -> &Arc<DeadLetterStore> {
        &self.dlq
    }

    /// The trace sink shared with workers.
    pub fn sink(&self) -> &Arc<dyn TraceSink> {
        &self.sink
    }

    /// Whether the producer API currently accepts jobs.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    fn resolve_queue(&self, name: &str) -> JobResult<&Arc<Queue>> {
        self.queues
            .get(name)
            .ok_or_else(|| JobError::NotFound(format!("unknown queue: {name}")))
    }

    // ========================================================================
    // Producer API
    // ========================================================================

    /// Core enqueue path shared by every producer operation.
    async fn enqueue(
        &self,
        payload: JobPayload,
        id: JobId,
        priority: i32,
        delay: Duration,
        dedup: bool,
    ) -> JobResult<Option<JobId>> {
        payload.validate()?;

        if !self.is_accepting() {
            debug!(job_id = %id, "Producer short-circuited: service is draining");
            return Ok(None);
        }

        let kind = payload.kind();
        let queue_name = kind.home_queue();
        let queue = match self.queues.get(queue_name) {
            Some(queue) => queue,
            None if self.config.test_mode => {
                warn!(queue = queue_name, "Queue missing in test mode, dropping job");
                return Ok(None);
            }
            None => {
                return Err(JobError::NotFound(format!("unknown queue: {queue_name}")));
            }
        };

        if dedup {
            match self
                .store
                .set_nx(&self.keys.unique(id.as_str()), "1", Some(DEDUP_TTL))
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(job_id = %id, "Duplicate enqueue suppressed inside dedup window");
                    return Ok(Some(id));
                }
                Err(e) if self.config.test_mode => {
                    warn!(error = %e, "Store unreachable in test mode, dropping job");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        let envelope = JobEnvelope::new(
            id.clone(),
            queue_name,
            payload,
            priority,
            delay,
            queue.policy().backoff.max_attempts,
            self.clock.now(),
        );

        match queue.push(&envelope).await {
            Ok(()) => {
                JobMetrics::job_enqueued(queue_name, kind.as_str());
                Ok(Some(id))
            }
            Err(e) if self.config.test_mode => {
                warn!(error = %e, "Store unreachable in test mode, dropping job");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn default_priority_for(&self, kind: JobKind) -> i32 {
        self.definitions
            .get(kind.home_queue())
            .map_or(0, |def| def.criticality.default_priority())
    }

    /// Enqueue a provider sync job.
    pub async fn enqueue_sync(
        &self,
        provider: &str,
        user_id: &str,
        connection_id: &str,
        full_sync: bool,
        priority: Option<i32>,
        delay: Option<Duration>,
    ) -> JobResult<Option<JobId>> {
        let id = JobId::from_string(format!(
            "sync-{provider}-{user_id}-{}",
            self.clock.now_millis()
        ));
        let payload = JobPayload::SyncTransactions {
            provider: provider.to_string(),
            user_id: user_id.to_string(),
            connection_id: connection_id.to_string(),
            full_sync,
        };
        let priority =
            priority.unwrap_or_else(|| self.default_priority_for(JobKind::SyncTransactions));
        self.enqueue(payload, id, priority, delay.unwrap_or(Duration::ZERO), false)
            .await
    }

    /// Enqueue a categorization job.
    pub async fn enqueue_categorize(
        &self,
        space_id: &str,
        transaction_ids: Vec<String>,
        priority: Option<i32>,
    ) -> JobResult<Option<JobId>> {
        let id = JobId::from_string(format!(
            "categorize-{space_id}-{}",
            self.clock.now_millis()
        ));
        let payload = JobPayload::CategorizeTransactions {
            space_id: space_id.to_string(),
            transaction_ids,
        };
        let priority =
            priority.unwrap_or_else(|| self.default_priority_for(JobKind::CategorizeTransactions));
        self.enqueue(payload, id, priority, Duration::ZERO, false).await
    }

    /// Enqueue an ESG refresh job.
    pub async fn enqueue_esg(
        &self,
        symbols: Vec<String>,
        force_refresh: bool,
        priority: Option<i32>,
    ) -> JobResult<Option<JobId>> {
        let id = JobId::from_string(format!(
            "esg-{}-{}",
            symbols.join("-"),
            self.clock.now_millis()
        ));
        let payload = JobPayload::EsgUpdate {
            symbols,
            force_refresh,
        };
        let priority = priority.unwrap_or_else(|| self.default_priority_for(JobKind::EsgUpdate));
        self.enqueue(payload, id, priority, Duration::ZERO, false).await
    }

    /// Enqueue a valuation snapshot job, deduplicating per space per day.
    pub async fn enqueue_snapshot(
        &self,
        space_id: &str,
        date: Option<NaiveDate>,
        priority: Option<i32>,
    ) -> JobResult<Option<JobId>> {
        let date = date.unwrap_or_else(|| self.clock.now().date_naive());
        let id = JobId::from_string(format!("snapshot-{space_id}-{}", date.format("%Y-%m-%d")));
        let payload = JobPayload::ValuationSnapshot {
            space_id: space_id.to_string(),
            date: Some(date),
        };
        let priority =
            priority.unwrap_or_else(|| self.default_priority_for(JobKind::ValuationSnapshot));
        self.enqueue(payload, id, priority, Duration::ZERO, true).await
    }

    /// Enqueue a templated email. Email priority remaps to queue priority:
    /// high -> 80, low -> 10, else 40.
    pub async fn enqueue_email(
        &self,
        to: &str,
        template: &str,
        data: serde_json::Value,
        priority: Option<EmailPriority>,
    ) -> JobResult<Option<JobId>> {
        let id = JobId::from_string(format!("email-{to}-{}", self.clock.now_millis()));
        let queue_priority = priority.unwrap_or(EmailPriority::Normal).queue_priority();
        let payload = JobPayload::SendEmail {
            to: to.to_string(),
            template: template.to_string(),
            data,
            priority,
        };
        self.enqueue(payload, id, queue_priority, Duration::ZERO, false)
            .await
    }

    /// Enqueue a property-valuation job.
    pub async fn enqueue_property(
        &self,
        request: crate::job::PropertyValuationRequest,
        priority: Option<i32>,
    ) -> JobResult<Option<JobId>> {
        let discriminant = match &request {
            crate::job::PropertyValuationRequest::RefreshSingle { property_id } => {
                property_id.clone()
            }
            crate::job::PropertyValuationRequest::RefreshSpace { space_id } => space_id.clone(),
            crate::job::PropertyValuationRequest::RefreshAll => "all".to_string(),
        };
        let id = JobId::from_string(format!(
            "property-{discriminant}-{}",
            self.clock.now_millis()
        ));
        let payload = JobPayload::PropertyValuation { request };
        let priority =
            priority.unwrap_or_else(|| self.default_priority_for(JobKind::PropertyValuation));
        self.enqueue(payload, id, priority, Duration::ZERO, false).await
    }

    /// Register a recurring job with repeat metadata. The id is stable per
    /// schedule name; re-registration replaces the previous queue member so
    /// repeats never accumulate.
    pub async fn schedule_recurring(
        &self,
        queue_name: &str,
        schedule_name: &str,
        payload: JobPayload,
        cron_expr: &str,
    ) -> JobResult<Option<JobId>> {
        cron::Schedule::from_str(cron_expr)
            .map_err(|e| JobError::Configuration(format!("invalid cron expression: {e}")))?;

        if !self.is_accepting() {
            return Ok(None);
        }

        let queue = match self.resolve_queue(queue_name) {
            Ok(queue) => queue,
            Err(_) if self.config.test_mode => {
                warn!(queue = queue_name, "Queue missing in test mode, dropping recurring job");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let id = JobId::from_string(format!("recurring-{schedule_name}"));
        let record_key = self.keys.recurring(schedule_name);

        // Drop the previous repeat before adding the next one.
        if let Some(existing) = self.store.get(&record_key).await? {
            if let Ok(record) = serde_json::from_str::<RecurringRecord>(&existing) {
                let _ = queue.remove_member(&record.last_member).await;
            }
        }

        let envelope = JobEnvelope::new(
            id.clone(),
            queue_name,
            payload,
            self.definitions
                .get(queue_name)
                .map_or(0, |d| d.criticality.default_priority()),
            Duration::ZERO,
            queue.policy().backoff.max_attempts,
            self.clock.now(),
        );
        queue.push(&envelope).await?;

        let record = RecurringRecord {
            queue: queue_name.to_string(),
            cron: cron_expr.to_string(),
            last_member: envelope.to_json()?,
        };
        self.store
            .set(&record_key, &serde_json::to_string(&record)?, None)
            .await?;

        Ok(Some(id))
    }

    // ========================================================================
    // Worker registration
    // ========================================================================

    /// Register a processor; its kind determines the queue it consumes.
    pub fn register_processor(&self, processor: Arc<dyn Processor>) -> JobResult<()> {
        let kind = processor.kind();
        let queue_name = kind.home_queue();
        let def = self
            .definitions
            .get(queue_name)
            .ok_or_else(|| JobError::NotFound(format!("unknown queue: {queue_name}")))?;
        if def.storage_only {
            return Err(JobError::Configuration(format!(
                "queue {queue_name} is storage-only and cannot have workers"
            )));
        }

        self.registrations
            .write()
            .entry(def.name)
            .or_default()
            .insert(kind, processor);
        info!(queue = queue_name, kind = %kind, "Registered processor");
        Ok(())
    }

    /// Spawn worker pools for every queue with registered processors.
    pub fn start_workers(&self) -> JobResult<()> {
        let registrations = std::mem::take(&mut *self.registrations.write());
        if registrations.is_empty() {
            return Err(JobError::Configuration(
                "no processors registered".to_string(),
            ));
        }

        let mut pools = self.pools.lock();
        let mut handles = self.pool_handles.lock();

        for (queue_name, processors) in registrations {
            let queue = self.queues[queue_name].clone();
            let concurrency = queue.policy().concurrency;
            let pool = Arc::new(WorkerPool::new(
                queue,
                processors,
                self.dlq.clone(),
                self.sink.clone(),
                self.clock.clone(),
                concurrency,
                self.config.worker.poll_interval(),
                self.config.worker.shutdown_timeout(),
            ));
            let runner = pool.clone();
            handles.push(tokio::spawn(async move { runner.run().await }));
            pools.push(pool);
        }

        info!(pools = pools.len(), "Started worker pools");
        Ok(())
    }

    /// Stop all worker pools and wait for their loops to exit.
    pub async fn stop_workers(&self) {
        for pool in self.pools.lock().iter() {
            pool.stop();
        }
        let handles = std::mem::take(&mut *self.pool_handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker pool task panicked");
            }
        }
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Pause one queue. Unknown queues are an error.
    pub async fn pause_queue(&self, name: &str) -> JobResult<()> {
        self.resolve_queue(name)?.pause().await
    }

    /// Resume one queue.
    pub async fn resume_queue(&self, name: &str) -> JobResult<()> {
        self.resolve_queue(name)?.resume().await
    }

    /// Delete all waiting and delayed jobs on one queue.
    pub async fn clear_queue(&self, name: &str) -> JobResult<u64> {
        self.resolve_queue(name)?.clear().await
    }

    /// Re-enqueue the failed history of one queue.
    pub async fn retry_failed(&self, name: &str) -> JobResult<u64> {
        self.resolve_queue(name)?.retry_failed().await
    }

    /// Counts for one queue.
    pub async fn queue_stats(&self, name: &str) -> JobResult<QueueCounts> {
        let counts = self.resolve_queue(name)?.counts().await?;
        JobMetrics::update_queue_sizes(name, counts.waiting, counts.active, counts.delayed);
        Ok(counts)
    }

    /// Counts for every provisioned queue.
    pub async fn all_queue_stats(&self) -> JobResult<HashMap<String, QueueCounts>> {
        let mut stats = HashMap::new();
        for (name, queue) in &self.queues {
            stats.insert((*name).to_string(), queue.counts().await?);
        }
        Ok(stats)
    }

    // ========================================================================
    // Drain
    // ========================================================================

    /// Graceful drain: stop accepting, pause every queue, and poll active
    /// counts until they reach zero or the timeout elapses. Idempotent
    /// across concurrent calls.
    pub async fn drain(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(Duration::from_secs(30));
        let was_accepting = self.accepting.swap(false, Ordering::SeqCst);
        if was_accepting {
            info!(timeout_ms = timeout.as_millis() as u64, "Drain started");
        } else {
            debug!("Drain already in progress; joining the wait");
        }

        for (name, queue) in &self.queues {
            if let Err(e) = queue.pause().await {
                error!(queue = name, error = %e, "Failed to pause queue during drain");
            }
        }

        let started = Instant::now();
        loop {
            let mut residual: Vec<(&str, u64)> = Vec::new();
            let mut total_active = 0u64;
            for (name, queue) in &self.queues {
                match queue.counts().await {
                    Ok(counts) => {
                        total_active += counts.active;
                        if counts.active > 0 {
                            residual.push((name, counts.active));
                        }
                    }
                    Err(e) => {
                        error!(queue = name, error = %e, "Failed to read counts during drain");
                    }
                }
            }

            if total_active == 0 {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Drain complete"
                );
                return;
            }

            if started.elapsed() >= timeout {
                for (name, active) in residual {
                    warn!(
                        queue = name,
                        active,
                        "Drain timed out with active jobs; retry policy covers interrupted work"
                    );
                }
                return;
            }

            tokio::time::sleep(DRAIN_POLL_INTERVAL.min(timeout.saturating_sub(started.elapsed())))
                .await;
        }
    }
}
