//! Prometheus-style metrics for queue monitoring.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job queue system.
pub mod names {
    /// Total jobs enqueued.
    pub const JOBS_ENQUEUED_TOTAL: &str = "fiscus_jobs_enqueued_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "fiscus_jobs_completed_total";
    /// Total job retries.
    pub const JOBS_RETRIED_TOTAL: &str = "fiscus_jobs_retried_total";
    /// Total jobs sent to the dead-letter store.
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "fiscus_jobs_dead_lettered_total";
    /// Total stalled jobs reclaimed.
    pub const JOBS_STALLED_TOTAL: &str = "fiscus_jobs_stalled_total";

    /// Current waiting jobs.
    pub const JOBS_WAITING: &str = "fiscus_jobs_waiting";
    /// Current active jobs.
    pub const JOBS_ACTIVE: &str = "fiscus_jobs_active";
    /// Current delayed jobs.
    pub const JOBS_DELAYED: &str = "fiscus_jobs_delayed";
    /// Current dead-letter store size.
    pub const JOBS_DEAD_LETTER: &str = "fiscus_jobs_dead_letter";

    /// Job execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "fiscus_job_duration_seconds";

    /// Scheduled ticks executed.
    pub const SCHEDULER_TICKS_TOTAL: &str = "fiscus_scheduler_ticks_total";
    /// Scheduled ticks skipped because the previous run was still going.
    pub const SCHEDULER_TICKS_SKIPPED: &str = "fiscus_scheduler_ticks_skipped_total";

    /// Active provider connections (session-cleanup schedule).
    pub const CONNECTIONS_ACTIVE: &str = "fiscus_connections_active";
    /// Stale provider connections.
    pub const CONNECTIONS_STALE: &str = "fiscus_connections_stale";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total number of job retries");
    describe_counter!(
        names::JOBS_DEAD_LETTERED_TOTAL,
        "Total number of jobs sent to the dead-letter store"
    );
    describe_counter!(
        names::JOBS_STALLED_TOTAL,
        "Total number of stalled jobs reclaimed"
    );

    describe_gauge!(names::JOBS_WAITING, "Current number of waiting jobs");
    describe_gauge!(names::JOBS_ACTIVE, "Current number of active jobs");
    describe_gauge!(names::JOBS_DELAYED, "Current number of delayed jobs");
    describe_gauge!(
        names::JOBS_DEAD_LETTER,
        "Current size of the dead-letter store"
    );

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job execution duration in seconds"
    );

    describe_counter!(
        names::SCHEDULER_TICKS_TOTAL,
        "Total number of scheduled ticks executed"
    );
    describe_counter!(
        names::SCHEDULER_TICKS_SKIPPED,
        "Total number of ticks skipped due to reentrancy"
    );

    describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Active provider connections observed by the session-cleanup schedule"
    );
    describe_gauge!(
        names::CONNECTIONS_STALE,
        "Stale provider connections observed by the session-cleanup schedule"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job enqueued.
    pub fn job_enqueued(queue: &str, kind: &str) {
        counter!(
            names::JOBS_ENQUEUED_TOTAL,
            "queue" => queue.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(queue: &str, kind: &str, duration: Duration) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            "queue" => queue.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "kind" => kind.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job retried.
    pub fn job_retried(queue: &str, kind: &str, attempt: u32) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "queue" => queue.to_string(),
            "kind" => kind.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
    }

    /// Record a job sent to the DLQ.
    pub fn job_dead_lettered(queue: &str, kind: &str, reason: &str) {
        counter!(
            names::JOBS_DEAD_LETTERED_TOTAL,
            "queue" => queue.to_string(),
            "kind" => kind.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    /// Update per-queue size gauges.
    pub fn update_queue_sizes(queue: &str, waiting: u64, active: u64, delayed: u64) {
        gauge!(names::JOBS_WAITING, "queue" => queue.to_string()).set(waiting as f64);
        gauge!(names::JOBS_ACTIVE, "queue" => queue.to_string()).set(active as f64);
        gauge!(names::JOBS_DELAYED, "queue" => queue.to_string()).set(delayed as f64);
    }
}

/// Scheduler metrics recorder.
#[derive(Clone)]
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    /// Record a tick executed.
    pub fn tick(schedule: &str, status: &str) {
        counter!(
            names::SCHEDULER_TICKS_TOTAL,
            "schedule" => schedule.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
    }

    /// Record a tick skipped by the reentrancy guard.
    pub fn tick_skipped(schedule: &str) {
        counter!(
            names::SCHEDULER_TICKS_SKIPPED,
            "schedule" => schedule.to_string()
        )
        .increment(1);
    }

    /// Record connection counts from the session-cleanup schedule.
    pub fn connection_counts(active: u64, stale: u64) {
        gauge!(names::CONNECTIONS_ACTIVE).set(active as f64);
        gauge!(names::CONNECTIONS_STALE).set(stale as f64);
    }
}
