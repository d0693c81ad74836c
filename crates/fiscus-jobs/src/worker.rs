//! Worker pool for processing jobs.

use crate::dlq::{DeadLetterEntry, DeadLetterStore};
use crate::error::{JobError, JobResult};
use crate::job::{JobContext, JobEnvelope, JobKind};
use crate::metrics::JobMetrics;
use crate::queue::{FailureDisposition, Queue};
use async_trait::async_trait;
use fiscus_core::{Clock, Severity, SharedClock, TraceSink};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Typed consumer for one job kind.
///
/// Processors must be idempotent: delivery is at-least-once and stalled
/// jobs are re-offered.
#[async_trait]
pub trait Processor: Send + Sync {
    /// The kind this processor handles.
    fn kind(&self) -> JobKind;

    /// Execute one job. The returned value is recorded at debug level and
    /// otherwise discarded.
    async fn run(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError>;
}

struct WorkerCore {
    pool_id: String,
    queue: Arc<Queue>,
    processors: HashMap<JobKind, Arc<dyn Processor>>,
    dlq: Arc<DeadLetterStore>,
    sink: Arc<dyn TraceSink>,
    clock: SharedClock,
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
}

impl WorkerCore {
    async fn process_one(&self, envelope: JobEnvelope) {
        let ctx = envelope.to_context();

        let Some(processor) = self.processors.get(&envelope.kind()) else {
            error!(
                queue = %envelope.queue,
                job_id = %envelope.id,
                kind = %envelope.kind(),
                "No processor registered for job kind"
            );
            let err = JobError::Configuration(format!(
                "no processor registered for kind {}",
                envelope.kind()
            ));
            self.handle_failure(envelope, ctx.attempt, &err).await;
            return;
        };

        debug!(
            queue = %ctx.queue,
            job_id = %ctx.job_id,
            attempt = ctx.attempt,
            "Processing job"
        );

        let started = Instant::now();
        let result = processor.run(&ctx).await;
        let elapsed = started.elapsed();

        match result {
            Ok(value) => {
                debug!(
                    job_id = %ctx.job_id,
                    duration_ms = elapsed.as_millis() as u64,
                    result = %value,
                    "Job completed"
                );
                if let Err(e) = self.queue.complete(&envelope).await {
                    error!(job_id = %ctx.job_id, error = %e, "Failed to mark job as complete");
                }
                JobMetrics::job_completed(&ctx.queue, envelope.kind().as_str(), elapsed);
                self.jobs_processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.handle_failure(envelope, ctx.attempt, &err).await;
            }
        }
    }

    /// Retry-or-DLQ accounting for a failed run. `attempt` is 1-based.
    async fn handle_failure(&self, envelope: JobEnvelope, attempt: u32, err: &JobError) {
        let kind = envelope.kind();
        let queue_name = envelope.queue.clone();
        let job_id = envelope.id.clone();
        let severity = JobError::severity_for_attempt(attempt, envelope.max_attempts);

        warn!(
            queue = %queue_name,
            job_id = %job_id,
            attempt,
            max_attempts = envelope.max_attempts,
            error = %err,
            "Job execution failed"
        );

        match self.queue.fail(envelope, err).await {
            Ok(FailureDisposition::Retried { next_delay }) => {
                self.sink.capture_exception(
                    &err.to_string(),
                    &[
                        ("queue", queue_name.clone()),
                        ("job_id", job_id.to_string()),
                        ("domain", err.domain_kind().to_string()),
                        ("attempt", attempt.to_string()),
                    ],
                    severity,
                );
                JobMetrics::job_retried(&queue_name, kind.as_str(), attempt);
                debug!(
                    job_id = %job_id,
                    retry_in_ms = next_delay.as_millis() as u64,
                    "Job scheduled for retry"
                );
            }
            Ok(FailureDisposition::Exhausted(exhausted)) => {
                let entry = DeadLetterEntry::from_envelope(&exhausted, self.clock.now());
                self.dlq.push(&entry).await;
                self.sink.capture_exception(
                    &err.to_string(),
                    &[
                        ("dlq", "true".to_string()),
                        ("queue", queue_name.clone()),
                        ("job_id", job_id.to_string()),
                        ("domain", err.domain_kind().to_string()),
                    ],
                    Severity::Error,
                );
                JobMetrics::job_dead_lettered(&queue_name, kind.as_str(), err.domain_kind());
            }
            Err(store_err) => {
                error!(
                    job_id = %job_id,
                    error = %store_err,
                    "Failed to record job failure"
                );
            }
        }

        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Worker pool statistics.
#[derive(Debug, Clone)]
pub struct WorkerPoolStats {
    pub id: String,
    pub queue: String,
    pub running: bool,
    pub concurrency: usize,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
}

/// A set of concurrent consumers bound to one queue.
///
/// Concurrency is bounded by a semaphore; each picked job runs in its own
/// task under a tracing span carrying the queue, job id, and attempt.
pub struct WorkerPool {
    core: Arc<WorkerCore>,
    concurrency: usize,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Create a pool over one queue with a processor registry.
    pub fn new(
        queue: Arc<Queue>,
        processors: HashMap<JobKind, Arc<dyn Processor>>,
        dlq: Arc<DeadLetterStore>,
        sink: Arc<dyn TraceSink>,
        clock: SharedClock,
        concurrency: usize,
        poll_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool_id = format!("worker-pool-{}", Uuid::new_v4());
        Self {
            core: Arc::new(WorkerCore {
                pool_id,
                queue,
                processors,
                dlq,
                sink,
                clock,
                jobs_processed: AtomicU64::new(0),
                jobs_failed: AtomicU64::new(0),
            }),
            concurrency: concurrency.max(1),
            poll_interval,
            shutdown_timeout,
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the polling loop until `stop` is called.
    pub async fn run(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Configuration(
                "worker pool already running".to_string(),
            ));
        }

        info!(
            pool_id = %self.core.pool_id,
            queue = %self.core.queue.name(),
            concurrency = self.concurrency,
            "Starting worker pool"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(pool_id = %self.core.pool_id, "Received shutdown signal");
                    break;
                }

                permit = semaphore.clone().acquire_owned() => {
                    let Ok(permit) = permit else { break };

                    match self.core.queue.next_job().await {
                        Ok(Some(envelope)) => {
                            let core = self.core.clone();
                            let span = tracing::info_span!(
                                "job",
                                queue = %envelope.queue,
                                job_id = %envelope.id,
                                attempt = envelope.attempts_made + 1,
                                user_id = envelope.payload.user_id().unwrap_or(""),
                            );
                            tokio::spawn(
                                async move {
                                    core.process_one(envelope).await;
                                    drop(permit);
                                }
                                .instrument(span),
                            );
                        }
                        Ok(None) => {
                            drop(permit);
                            tokio::time::sleep(self.poll_interval).await;
                        }
                        Err(e) => {
                            drop(permit);
                            error!(
                                pool_id = %self.core.pool_id,
                                error = %e,
                                "Failed to dequeue job"
                            );
                            tokio::time::sleep(self.poll_interval).await;
                        }
                    }
                }
            }
        }

        // Let in-flight jobs run to completion, bounded by the shutdown
        // timeout; leases recover anything cut off at teardown.
        let drained = timeout(self.shutdown_timeout, async {
            while semaphore.available_permits() < self.concurrency {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                pool_id = %self.core.pool_id,
                queue = %self.core.queue.name(),
                "Worker pool shutdown timed out with jobs in flight"
            );
        }

        self.running.store(false, Ordering::SeqCst);
        info!(
            pool_id = %self.core.pool_id,
            processed = self.core.jobs_processed.load(Ordering::Relaxed),
            failed = self.core.jobs_failed.load(Ordering::Relaxed),
            "Worker pool stopped"
        );

        Ok(())
    }

    /// Signal the polling loop to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Check if the pool loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue this pool consumes.
    pub fn queue_name(&self) -> &str {
        self.core.queue.name()
    }

    /// Pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            id: self.core.pool_id.clone(),
            queue: self.core.queue.name().to_string(),
            running: self.is_running(),
            concurrency: self.concurrency,
            jobs_processed: self.core.jobs_processed.load(Ordering::Relaxed),
            jobs_failed: self.core.jobs_failed.load(Ordering::Relaxed),
        }
    }
}
