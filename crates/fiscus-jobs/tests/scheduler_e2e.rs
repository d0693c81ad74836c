//! Scheduler behavior over the in-memory backend: schedule actions,
//! check-in pairs, and suppression windows.

mod common;

use chrono::Duration as ChronoDuration;
use common::Harness;
use fiscus_core::domain::{
    Account, AccountHealth, AccountType, Connection, ConnectionStatus, Executor, LifeBeatUser,
    ReportFormat, ReportSubscriber,
};
use fiscus_core::{CheckInStatus, Clock};

fn linked_account(id: &str, user_id: &str, space_id: &str) -> Account {
    Account {
        id: id.into(),
        space_id: space_id.into(),
        user_id: user_id.into(),
        account_type: AccountType::Checking,
        currency: "USD".into(),
        balance: 100.0,
        provider: Some("bitso".into()),
        read_only: false,
    }
}

fn connection(id: &str, user_id: &str, provider: &str) -> Connection {
    Connection {
        id: id.into(),
        user_id: user_id.into(),
        provider: provider.into(),
        status: ConnectionStatus::Active,
        last_sync_at: None,
    }
}

#[tokio::test]
async fn every_tick_produces_one_check_in_pair() {
    let harness = Harness::new();

    for name in harness.scheduler.schedule_names() {
        harness.scheduler.run_now(name).await.unwrap();
        let check_ins = harness.sink.check_ins_for(name);
        assert_eq!(check_ins.len(), 2, "schedule {name} check-ins");
        assert_eq!(check_ins[0].status, CheckInStatus::InProgress);
        assert_eq!(check_ins[1].status, CheckInStatus::Ok);
    }
}

#[tokio::test]
async fn categorize_hourly_enqueues_one_job_per_space() {
    let harness = Harness::new();
    *harness.spaces.spaces.lock() = vec!["s-1".into(), "s-2".into(), "s-3".into()];

    harness.scheduler.run_now("categorize-hourly").await.unwrap();

    assert_eq!(harness.waiting("categorize-transactions").await, 3);
}

#[tokio::test]
async fn crypto_sync_enqueues_once_per_distinct_user() {
    let harness = Harness::new();
    *harness.connections.connections.lock() = vec![
        connection("c-1", "u-1", "bitso"),
        connection("c-2", "u-1", "bitso"),
        connection("c-3", "u-2", "bitso"),
        connection("c-4", "u-3", "other-exchange"),
    ];

    harness
        .scheduler
        .run_now("crypto-portfolio-sync")
        .await
        .unwrap();

    assert_eq!(harness.waiting("sync-transactions").await, 2);
}

#[tokio::test]
async fn blockchain_sync_skips_users_without_a_wallet_connection() {
    let harness = Harness::new();
    *harness.spaces.read_only_manual_users.lock() = vec!["u-1".into(), "u-2".into()];
    *harness.connections.connections.lock() = vec![connection("c-9", "u-1", "blockchain")];

    harness
        .scheduler
        .run_now("blockchain-wallet-sync")
        .await
        .unwrap();

    assert_eq!(harness.waiting("sync-transactions").await, 1);
}

#[tokio::test]
async fn daily_snapshots_enqueue_per_space_and_dedup_within_the_day() {
    let harness = Harness::new();
    *harness.spaces.spaces.lock() = vec!["s-1".into(), "s-2".into()];

    harness
        .scheduler
        .run_now("daily-valuation-snapshots")
        .await
        .unwrap();
    harness
        .scheduler
        .run_now("daily-valuation-snapshots")
        .await
        .unwrap();

    // Two spaces, one snapshot job each despite two ticks on the same day.
    assert_eq!(harness.waiting("valuation-snapshots").await, 2);
}

#[tokio::test]
async fn pattern_retrain_covers_spaces_and_prunes_aged_corrections() {
    let harness = Harness::new();
    *harness.spaces.spaces.lock() = vec!["s-1".into(), "s-2".into()];

    harness.scheduler.run_now("pattern-retrain").await.unwrap();

    assert_eq!(harness.patterns.retrained.lock().as_slice(), &["s-1", "s-2"]);
    assert_eq!(harness.patterns.deleted_days.lock().as_slice(), &[365]);
}

#[tokio::test]
async fn hot_refresh_invalidates_recently_corrected_spaces() {
    let harness = Harness::new();
    *harness.patterns.recent_correction_spaces.lock() = vec!["s-7".into()];

    harness
        .scheduler
        .run_now("pattern-hot-refresh")
        .await
        .unwrap();

    assert_eq!(harness.patterns.invalidated.lock().as_slice(), &["s-7"]);
}

#[tokio::test]
async fn property_refresh_is_gated_on_api_availability() {
    let harness = Harness::new();

    harness
        .scheduler
        .run_now("property-valuation-refresh")
        .await
        .unwrap();
    assert_eq!(harness.waiting("property-valuation").await, 0);

    *harness.property.available.lock() = true;
    harness
        .scheduler
        .run_now("property-valuation-refresh")
        .await
        .unwrap();
    assert_eq!(harness.waiting("property-valuation").await, 1);
}

#[tokio::test]
async fn connection_health_suppresses_repeat_notifications_for_24h() {
    let harness = Harness::new();
    harness
        .spaces
        .accounts
        .lock()
        .insert("s-1".into(), vec![linked_account("a-1", "u-1", "s-1")]);
    harness
        .health
        .states
        .lock()
        .insert("a-1".into(), AccountHealth::RequiresReauth);
    harness
        .users
        .emails
        .lock()
        .insert("u-1".into(), "u1@example.com".into());

    harness.scheduler.run_now("connection-health").await.unwrap();
    assert_eq!(harness.waiting("email-notifications").await, 1);

    // Same state inside the window: suppressed.
    harness.scheduler.run_now("connection-health").await.unwrap();
    assert_eq!(harness.waiting("email-notifications").await, 1);

    // Window expired: a new notification goes out.
    harness.clock.advance(ChronoDuration::hours(25));
    harness.scheduler.run_now("connection-health").await.unwrap();
    assert_eq!(harness.waiting("email-notifications").await, 2);
}

#[tokio::test]
async fn connection_health_stamps_provider_on_healthy_accounts() {
    let harness = Harness::new();
    harness
        .spaces
        .accounts
        .lock()
        .insert("s-1".into(), vec![linked_account("a-1", "u-1", "s-1")]);

    harness.scheduler.run_now("connection-health").await.unwrap();

    assert_eq!(harness.connections.health_marks.lock().as_slice(), &["bitso"]);
    assert_eq!(harness.waiting("email-notifications").await, 0);
}

#[tokio::test]
async fn inactivity_monitor_suppresses_per_level_for_7_days() {
    let harness = Harness::new();
    let now = harness.clock.now();
    *harness.users.life_beat.lock() = vec![LifeBeatUser {
        user_id: "u-1".into(),
        email: "u1@example.com".into(),
        last_activity: Some(now - ChronoDuration::days(31)),
        last_login: Some(now - ChronoDuration::days(40)),
        alert_days: vec![30, 60],
        executors: vec![],
    }];

    harness.scheduler.run_now("inactivity-monitor").await.unwrap();
    assert_eq!(harness.waiting("email-notifications").await, 1);

    // Next day, same level: suppressed.
    harness.clock.advance(ChronoDuration::days(1));
    harness.scheduler.run_now("inactivity-monitor").await.unwrap();
    assert_eq!(harness.waiting("email-notifications").await, 1);

    // Eight days on, the window has lapsed: the level fires again.
    harness.clock.advance(ChronoDuration::days(7));
    harness.scheduler.run_now("inactivity-monitor").await.unwrap();
    assert_eq!(harness.waiting("email-notifications").await, 2);
}

#[tokio::test]
async fn inactivity_maximum_threshold_notifies_verified_executors() {
    let harness = Harness::new();
    let now = harness.clock.now();
    *harness.users.life_beat.lock() = vec![LifeBeatUser {
        user_id: "u-1".into(),
        email: "u1@example.com".into(),
        last_activity: Some(now - ChronoDuration::days(61)),
        last_login: None,
        alert_days: vec![30, 60],
        executors: vec![
            Executor {
                id: "e-1".into(),
                email: "exec1@example.com".into(),
                verified: true,
            },
            Executor {
                id: "e-2".into(),
                email: "exec2@example.com".into(),
                verified: false,
            },
        ],
    }];

    harness.scheduler.run_now("inactivity-monitor").await.unwrap();

    // Two user warnings (levels 30 and 60) plus one verified-executor
    // notice for the maximum level.
    assert_eq!(harness.waiting("email-notifications").await, 3);

    // Everything is inside its 7-day window on the next tick.
    harness.clock.advance(ChronoDuration::days(1));
    harness.scheduler.run_now("inactivity-monitor").await.unwrap();
    assert_eq!(harness.waiting("email-notifications").await, 3);
}

#[tokio::test]
async fn weekly_reports_queue_one_email_per_subscribed_space() {
    let harness = Harness::new();
    *harness.users.weekly.lock() = vec![ReportSubscriber {
        user_id: "u-1".into(),
        email: "u1@example.com".into(),
        space_ids: vec!["s-1".into(), "s-2".into()],
        format: ReportFormat::Pdf,
    }];

    harness.scheduler.run_now("weekly-reports").await.unwrap();

    assert_eq!(harness.waiting("email-notifications").await, 2);
}

#[tokio::test]
async fn monthly_reports_use_the_monthly_subscriber_list() {
    let harness = Harness::new();
    *harness.users.monthly.lock() = vec![ReportSubscriber {
        user_id: "u-2".into(),
        email: "u2@example.com".into(),
        space_ids: vec!["s-1".into()],
        format: ReportFormat::Csv,
    }];

    harness.scheduler.run_now("monthly-reports").await.unwrap();
    assert_eq!(harness.waiting("email-notifications").await, 1);

    // Weekly subscribers are untouched by the monthly tick.
    harness.scheduler.run_now("weekly-reports").await.unwrap();
    assert_eq!(harness.waiting("email-notifications").await, 1);
}

#[tokio::test]
async fn session_cleanup_only_reports_metrics() {
    let harness = Harness::new();
    harness.connections.counts.lock().active = 4;
    harness.connections.counts.lock().stale = 2;

    harness.scheduler.run_now("session-cleanup").await.unwrap();

    // No jobs enqueued anywhere by this schedule.
    let stats = harness.manager.all_queue_stats().await.unwrap();
    let total_waiting: u64 = stats.values().map(|c| c.waiting).sum();
    assert_eq!(total_waiting, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_loop_fires_when_the_clock_crosses_a_boundary() {
    let harness = Harness::new();
    *harness.spaces.spaces.lock() = vec!["s-1".into()];

    let scheduler = std::sync::Arc::new(harness.scheduler);
    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    // First poll initializes next-fire times; give it a moment.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Jump past the next hourly boundary.
    harness.clock.advance(ChronoDuration::hours(1));

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if harness
            .manager
            .queue_stats("categorize-transactions")
            .await
            .unwrap()
            .waiting
            >= 1
        {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "hourly schedule never fired"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    scheduler.stop();
    runner.await.unwrap().unwrap();
}
