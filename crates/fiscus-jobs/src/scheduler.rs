//! Cron scheduler: the sole source of periodic work.
//!
//! Schedules live in an explicit registration table built at init; each
//! entry carries a name, a cron expression, a tick function, and a
//! reentrancy flag. Every tick is wrapped in check-in reporting and never
//! lets a failure escape into the scheduler loop.

use crate::error::{JobError, JobResult};
use crate::job::PropertyValuationRequest;
use crate::manager::QueueManager;
use crate::metrics::SchedulerMetrics;
use crate::store::{StoreBackend, StoreKeys};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use fiscus_core::domain::{
    AccountHealth, ConnectionDirectory, EmailAttachment, PatternModel, PropertyValuationApi,
    ProviderHealthCheck, ReportBuilder, ReportCadence, ReportRange, SpaceDirectory, UserDirectory,
};
use fiscus_core::{CheckIn, CheckInStatus, Clock, Severity, SharedClock, TraceSink};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Fixed popular list unioned into every ESG refresh.
pub const POPULAR_CRYPTO_SYMBOLS: &[&str] =
    &["BTC", "ETH", "ADA", "DOT", "SOL", "ALGO", "MATIC", "AVAX"];

/// Suppression window for connection-health notifications.
const HEALTH_SUPPRESSION: Duration = Duration::from_secs(24 * 3600);

/// Suppression window for inactivity alerts and executor notices.
const INACTIVITY_SUPPRESSION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Pacing gap between corrections-cache lookbacks.
const HOT_REFRESH_LOOKBACK_HOURS: i64 = 2;

type TickFn = Arc<dyn Fn() -> BoxFuture<'static, JobResult<()>> + Send + Sync>;

/// One entry of the registration table.
pub struct Schedule {
    name: &'static str,
    cron_expr: String,
    schedule: cron::Schedule,
    tick: TickFn,
    processing: Arc<AtomicBool>,
    next_fire: Mutex<Option<DateTime<Utc>>>,
}

impl Schedule {
    /// Build a schedule from a cron expression and tick function.
    pub fn new(
        name: &'static str,
        cron_expr: &str,
        tick: TickFn,
    ) -> JobResult<Self> {
        let schedule = cron::Schedule::from_str(cron_expr)
            .map_err(|e| JobError::Configuration(format!("invalid cron expression: {e}")))?;
        Ok(Self {
            name,
            cron_expr: cron_expr.to_string(),
            schedule,
            tick,
            processing: Arc::new(AtomicBool::new(false)),
            next_fire: Mutex::new(None),
        })
    }

    /// Schedule name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cron expression.
    pub fn cron_expr(&self) -> &str {
        &self.cron_expr
    }

    /// Next fire time strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }
}

/// Execute one tick under the reentrancy guard and check-in wrapper.
/// Failures are captured and swallowed.
async fn execute_tick(sink: &Arc<dyn TraceSink>, schedule: &Schedule) {
    if schedule.processing.swap(true, Ordering::SeqCst) {
        info!(schedule = schedule.name, "skipping — previous still running");
        SchedulerMetrics::tick_skipped(schedule.name);
        return;
    }

    sink.capture_check_in(CheckIn::in_progress(schedule.name, &schedule.cron_expr));
    let started = Instant::now();
    let result = (schedule.tick)().await;
    let duration = started.elapsed();

    match result {
        Ok(()) => {
            debug!(
                schedule = schedule.name,
                duration_ms = duration.as_millis() as u64,
                "Tick completed"
            );
            sink.capture_check_in(CheckIn::finished(
                schedule.name,
                CheckInStatus::Ok,
                duration,
            ));
            SchedulerMetrics::tick(schedule.name, "ok");
        }
        Err(e) => {
            error!(schedule = schedule.name, error = %e, "Tick failed");
            sink.capture_exception(
                &e.to_string(),
                &[
                    ("schedule", schedule.name.to_string()),
                    ("kind", e.domain_kind().to_string()),
                ],
                Severity::Error,
            );
            sink.capture_check_in(CheckIn::finished(
                schedule.name,
                CheckInStatus::Error,
                duration,
            ));
            SchedulerMetrics::tick(schedule.name, "error");
        }
    }

    schedule.processing.store(false, Ordering::SeqCst);
}

/// Everything the fixed schedule set needs to produce work.
#[derive(Clone)]
pub struct ScheduleDeps {
    pub manager: Arc<QueueManager>,
    pub store: Arc<dyn StoreBackend>,
    pub keys: StoreKeys,
    pub clock: SharedClock,
    pub connections: Arc<dyn ConnectionDirectory>,
    pub spaces: Arc<dyn SpaceDirectory>,
    pub patterns: Arc<dyn PatternModel>,
    pub users: Arc<dyn UserDirectory>,
    pub reports: Arc<dyn ReportBuilder>,
    pub health: Arc<dyn ProviderHealthCheck>,
    pub property_api: Arc<dyn PropertyValuationApi>,
}

impl ScheduleDeps {
    /// Arm a suppression window; returns true when the subject is still
    /// inside a previously armed window.
    async fn suppressed(&self, scope: &str, subject: &str, window: Duration) -> JobResult<bool> {
        let armed = self
            .store
            .set_nx(&self.keys.suppression(scope, subject), "1", Some(window))
            .await?;
        Ok(!armed)
    }
}

/// Time-triggered source that enqueues periodic batch jobs.
pub struct CronScheduler {
    schedules: Vec<Arc<Schedule>>,
    sink: Arc<dyn TraceSink>,
    clock: SharedClock,
    poll_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
}

impl CronScheduler {
    /// Create a scheduler over an explicit schedule table.
    pub fn new(
        schedules: Vec<Arc<Schedule>>,
        sink: Arc<dyn TraceSink>,
        clock: SharedClock,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            schedules,
            sink,
            clock,
            poll_interval,
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a scheduler with the fixed schedule set.
    pub fn with_fixed_schedules(
        deps: ScheduleDeps,
        sink: Arc<dyn TraceSink>,
        poll_interval: Duration,
    ) -> JobResult<Self> {
        let clock = deps.clock.clone();
        Ok(Self::new(
            build_schedules(&deps)?,
            sink,
            clock,
            poll_interval,
        ))
    }

    /// Registered schedule names.
    pub fn schedule_names(&self) -> Vec<&'static str> {
        self.schedules.iter().map(|s| s.name).collect()
    }

    /// Test hook: whether one schedule's tick is mid-flight.
    pub fn is_processing(&self, name: &str) -> Option<bool> {
        self.schedules
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.processing.load(Ordering::SeqCst))
    }

    /// Run one schedule immediately, awaiting its completion.
    pub async fn run_now(&self, name: &str) -> JobResult<()> {
        let schedule = self
            .schedules
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| JobError::NotFound(format!("unknown schedule: {name}")))?;
        execute_tick(&self.sink, schedule).await;
        Ok(())
    }

    /// Run the polling loop until `stop` is called.
    pub async fn run(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Configuration(
                "scheduler already running".to_string(),
            ));
        }

        info!(
            schedules = self.schedules.len(),
            "Starting cron scheduler"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.poll_interval) => {
                    let now = self.clock.now();
                    for schedule in &self.schedules {
                        let due = {
                            let mut next_fire = schedule.next_fire.lock();
                            match *next_fire {
                                None => {
                                    *next_fire = schedule.next_after(now);
                                    false
                                }
                                Some(at) if now >= at => {
                                    *next_fire = schedule.next_after(now);
                                    true
                                }
                                Some(_) => false,
                            }
                        };

                        if due {
                            let schedule = schedule.clone();
                            let sink = self.sink.clone();
                            tokio::spawn(async move {
                                execute_tick(&sink, &schedule).await;
                            });
                        }
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Scheduler stopped");
        Ok(())
    }

    /// Signal the polling loop to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Check if the loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Wrap a tick function into the boxed closure the table stores.
fn tick_fn<F, Fut>(deps: &ScheduleDeps, f: F) -> TickFn
where
    F: Fn(ScheduleDeps) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = JobResult<()>> + Send + 'static,
{
    let deps = deps.clone();
    Arc::new(move || f(deps.clone()).boxed())
}

/// Build the fixed schedule table.
pub fn build_schedules(deps: &ScheduleDeps) -> JobResult<Vec<Arc<Schedule>>> {
    let table = vec![
        Schedule::new("categorize-hourly", "0 0 * * * *", tick_fn(deps, ticks::categorize_hourly))?,
        Schedule::new("crypto-portfolio-sync", "0 0 */4 * * *", tick_fn(deps, ticks::crypto_portfolio_sync))?,
        Schedule::new("blockchain-wallet-sync", "0 0 */6 * * *", tick_fn(deps, ticks::blockchain_wallet_sync))?,
        Schedule::new("session-cleanup", "0 0 2 * * *", tick_fn(deps, ticks::session_cleanup))?,
        Schedule::new("daily-valuation-snapshots", "0 0 3 * * *", tick_fn(deps, ticks::daily_valuation_snapshots))?,
        Schedule::new("esg-refresh", "0 0 6,18 * * *", tick_fn(deps, ticks::esg_refresh))?,
        Schedule::new("pattern-retrain", "0 0 2 * * *", tick_fn(deps, ticks::pattern_retrain))?,
        Schedule::new("pattern-hot-refresh", "0 30 * * * *", tick_fn(deps, ticks::pattern_hot_refresh))?,
        Schedule::new("connection-health", "0 */15 * * * *", tick_fn(deps, ticks::connection_health))?,
        Schedule::new("inactivity-monitor", "0 0 9 * * *", tick_fn(deps, ticks::inactivity_monitor))?,
        Schedule::new("weekly-reports", "0 0 8 * * MON", tick_fn(deps, |deps| ticks::reports(deps, ReportCadence::Weekly)))?,
        Schedule::new("monthly-reports", "0 0 8 1 * *", tick_fn(deps, |deps| ticks::reports(deps, ReportCadence::Monthly)))?,
        Schedule::new("property-valuation-refresh", "0 0 6 * * *", tick_fn(deps, ticks::property_valuation_refresh))?,
    ];
    Ok(table.into_iter().map(Arc::new).collect())
}

/// Last full ISO week (Monday through Sunday) before the week of `today`.
fn last_iso_week(today: NaiveDate) -> ReportRange {
    let days_from_monday = i64::from(today.weekday().num_days_from_monday());
    let this_week_start = today - chrono::Duration::days(days_from_monday);
    ReportRange {
        start: this_week_start - chrono::Duration::days(7),
        end: this_week_start - chrono::Duration::days(1),
    }
}

/// Last full calendar month before the month of `today`.
fn last_calendar_month(today: NaiveDate) -> ReportRange {
    let first_of_month = today.with_day(1).expect("day 1 is always valid");
    let end = first_of_month - chrono::Duration::days(1);
    ReportRange {
        start: end.with_day(1).expect("day 1 is always valid"),
        end,
    }
}

mod ticks {
    use super::*;

    /// Enqueue a categorize-transactions job for every known space.
    pub(super) async fn categorize_hourly(deps: ScheduleDeps) -> JobResult<()> {
        let spaces = deps.spaces.space_ids().await.map_err(JobError::from)?;
        let count = spaces.len();
        for space_id in spaces {
            deps.manager
                .enqueue_categorize(&space_id, Vec::new(), None)
                .await?;
        }
        debug!(spaces = count, "Queued hourly categorization");
        Ok(())
    }

    /// One sync job per distinct user with a bitso connection.
    pub(super) async fn crypto_portfolio_sync(deps: ScheduleDeps) -> JobResult<()> {
        let connections = deps
            .connections
            .connections_with_provider("bitso")
            .await
            .map_err(JobError::from)?;

        let mut seen_users = HashSet::new();
        for connection in connections {
            if !seen_users.insert(connection.user_id.clone()) {
                continue;
            }
            deps.manager
                .enqueue_sync("bitso", &connection.user_id, &connection.id, false, None, None)
                .await?;
        }
        debug!(users = seen_users.len(), "Queued crypto portfolio syncs");
        Ok(())
    }

    /// One blockchain sync per user owning a read-only manual account.
    pub(super) async fn blockchain_wallet_sync(deps: ScheduleDeps) -> JobResult<()> {
        let users = deps
            .spaces
            .users_with_read_only_manual_accounts()
            .await
            .map_err(JobError::from)?;

        for user_id in users {
            match deps
                .connections
                .find_by_user_and_provider(&user_id, "blockchain")
                .await
                .map_err(JobError::from)?
            {
                Some(connection) => {
                    deps.manager
                        .enqueue_sync("blockchain", &user_id, &connection.id, false, None, None)
                        .await?;
                }
                None => {
                    debug!(user_id = %user_id, "No blockchain connection, skipping wallet sync");
                }
            }
        }
        Ok(())
    }

    /// Metrics only: report active vs stale connection counts.
    pub(super) async fn session_cleanup(deps: ScheduleDeps) -> JobResult<()> {
        let counts = deps
            .connections
            .connection_counts()
            .await
            .map_err(JobError::from)?;
        SchedulerMetrics::connection_counts(counts.active, counts.stale);
        info!(
            active = counts.active,
            stale = counts.stale,
            "Connection session counts"
        );
        Ok(())
    }

    /// Enqueue a valuation-snapshot job per space.
    pub(super) async fn daily_valuation_snapshots(deps: ScheduleDeps) -> JobResult<()> {
        for space_id in deps.spaces.space_ids().await.map_err(JobError::from)? {
            deps.manager.enqueue_snapshot(&space_id, None, None).await?;
        }
        Ok(())
    }

    /// One esg-update job with observed symbols unioned with the fixed
    /// popular list.
    pub(super) async fn esg_refresh(deps: ScheduleDeps) -> JobResult<()> {
        let observed = deps
            .spaces
            .observed_crypto_symbols()
            .await
            .map_err(JobError::from)?;

        let mut symbols: Vec<String> = Vec::new();
        for symbol in observed
            .into_iter()
            .chain(POPULAR_CRYPTO_SYMBOLS.iter().map(|s| (*s).to_string()))
        {
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }

        deps.manager.enqueue_esg(symbols, false, None).await?;
        Ok(())
    }

    /// Retrain per-space patterns and drop corrections older than a year.
    pub(super) async fn pattern_retrain(deps: ScheduleDeps) -> JobResult<()> {
        for space_id in deps.spaces.space_ids().await.map_err(JobError::from)? {
            deps.patterns
                .retrain_space(&space_id)
                .await
                .map_err(JobError::from)?;
        }
        let deleted = deps
            .patterns
            .delete_corrections_older_than(365)
            .await
            .map_err(JobError::from)?;
        if deleted > 0 {
            info!(deleted, "Pruned aged categorization corrections");
        }
        Ok(())
    }

    /// Invalidate pattern caches for spaces with recent corrections.
    pub(super) async fn pattern_hot_refresh(deps: ScheduleDeps) -> JobResult<()> {
        let cutoff = deps.clock.now() - chrono::Duration::hours(HOT_REFRESH_LOOKBACK_HOURS);
        let spaces = deps
            .patterns
            .spaces_with_corrections_since(cutoff)
            .await
            .map_err(JobError::from)?;
        for space_id in &spaces {
            deps.patterns
                .invalidate_cache(space_id)
                .await
                .map_err(JobError::from)?;
        }
        debug!(spaces = spaces.len(), "Invalidated hot pattern caches");
        Ok(())
    }

    /// Classify linked accounts, emit consolidated notifications with a
    /// 24 h suppression per (user, account), stamp provider health.
    pub(super) async fn connection_health(deps: ScheduleDeps) -> JobResult<()> {
        let now = deps.clock.now();
        let spaces = deps
            .spaces
            .spaces_with_linked_accounts()
            .await
            .map_err(JobError::from)?;

        for space_id in spaces {
            let accounts = deps
                .spaces
                .accounts_in_space(&space_id)
                .await
                .map_err(JobError::from)?;

            let mut problems: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
            for account in accounts.iter().filter(|a| !a.is_manual()) {
                let state = deps
                    .health
                    .classify(account)
                    .await
                    .map_err(JobError::from)?;

                if state == AccountHealth::Ok {
                    if let Some(provider) = &account.provider {
                        deps.connections
                            .mark_provider_health(provider, now)
                            .await
                            .map_err(JobError::from)?;
                    }
                    continue;
                }

                let subject = format!("{}:{}", account.user_id, account.id);
                if deps
                    .suppressed("health", &subject, HEALTH_SUPPRESSION)
                    .await?
                {
                    continue;
                }
                problems
                    .entry(account.user_id.clone())
                    .or_default()
                    .push(serde_json::json!({
                        "accountId": account.id,
                        "provider": account.provider,
                        "state": state,
                    }));
            }

            for (user_id, accounts) in problems {
                let Some(to) = deps
                    .users
                    .email_for(&user_id)
                    .await
                    .map_err(JobError::from)?
                else {
                    warn!(user_id = %user_id, "No email on file for health notification");
                    continue;
                };
                deps.manager
                    .enqueue_email(
                        &to,
                        "connection-health",
                        serde_json::json!({ "accounts": accounts }),
                        None,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Life-beat inactivity warnings with 7 d suppression per level; the
    /// maximum threshold also notifies verified executors.
    pub(super) async fn inactivity_monitor(deps: ScheduleDeps) -> JobResult<()> {
        let now = deps.clock.now();
        let users = deps.users.life_beat_users().await.map_err(JobError::from)?;

        for user in users {
            let last_seen = match (user.last_activity, user.last_login) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };
            let Some(last_seen) = last_seen else { continue };
            let days_inactive = (now - last_seen).num_days();
            if days_inactive <= 0 {
                continue;
            }

            let max_threshold = user.alert_days.iter().copied().max();
            for threshold in user
                .alert_days
                .iter()
                .copied()
                .filter(|t| days_inactive >= i64::from(*t))
            {
                let subject = format!("{}:{}", user.user_id, threshold);
                if deps
                    .suppressed("inactivity", &subject, INACTIVITY_SUPPRESSION)
                    .await?
                {
                    continue;
                }

                deps.manager
                    .enqueue_email(
                        &user.email,
                        "inactivity-warning",
                        serde_json::json!({
                            "daysInactive": days_inactive,
                            "threshold": threshold,
                        }),
                        None,
                    )
                    .await?;

                if Some(threshold) == max_threshold {
                    for executor in user.executors.iter().filter(|e| e.verified) {
                        let subject =
                            format!("{}:{}:{}", user.user_id, executor.id, threshold);
                        if deps
                            .suppressed("executor", &subject, INACTIVITY_SUPPRESSION)
                            .await?
                        {
                            continue;
                        }
                        deps.manager
                            .enqueue_email(
                                &executor.email,
                                "executor-inactivity-notice",
                                serde_json::json!({
                                    "userId": user.user_id,
                                    "daysInactive": days_inactive,
                                    "threshold": threshold,
                                }),
                                None,
                            )
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Build last-period reports per subscribed space and queue them as
    /// email jobs with the file attached.
    pub(super) async fn reports(deps: ScheduleDeps, cadence: ReportCadence) -> JobResult<()> {
        let today = deps.clock.now().date_naive();
        let (range, template) = match cadence {
            ReportCadence::Weekly => (last_iso_week(today), "weekly-report"),
            ReportCadence::Monthly => (last_calendar_month(today), "monthly-report"),
        };

        let subscribers = deps
            .users
            .report_subscribers(cadence)
            .await
            .map_err(JobError::from)?;

        for subscriber in subscribers {
            for space_id in &subscriber.space_ids {
                let file = match deps.reports.build(space_id, range, subscriber.format).await {
                    Ok(file) => file,
                    Err(e) => {
                        warn!(
                            space_id = %space_id,
                            user_id = %subscriber.user_id,
                            error = %e,
                            "Report build failed, skipping space"
                        );
                        continue;
                    }
                };

                let attachment =
                    EmailAttachment::from_bytes(&file.file_name, &file.content_type, &file.bytes);
                deps.manager
                    .enqueue_email(
                        &subscriber.email,
                        template,
                        serde_json::json!({
                            "spaceId": space_id,
                            "rangeStart": range.start,
                            "rangeEnd": range.end,
                            "attachments": [attachment],
                        }),
                        None,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Queue a refresh-all property valuation, gated on API availability.
    pub(super) async fn property_valuation_refresh(deps: ScheduleDeps) -> JobResult<()> {
        if !deps.property_api.is_available().await {
            info!("Property valuation API unavailable, skipping refresh");
            return Ok(());
        }
        deps.manager
            .enqueue_property(PropertyValuationRequest::RefreshAll, None)
            .await?;
        Ok(())
    }
}
