//! Shared fixtures for the end-to-end suite: in-memory collaborator fakes
//! and a fully wired manager + scheduler harness.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fiscus_core::domain::{
    Account, AccountHealth, CategorizeStats, Connection, ConnectionCounts, ConnectionDirectory,
    Categorizer, EmailAttachment, EmailGateway, EsgCacheStats, EsgProvider, LifeBeatUser,
    PatternModel, PropertyValuationApi, ProviderAdapter, ProviderCredentials, ProviderHealthCheck,
    ReportBuilder, ReportCadence, ReportFile, ReportFormat, ReportRange, ReportSubscriber,
    SnapshotRepository, SpaceDirectory, SyncOutcome, SyncStats, ValuationSnapshot,
};
use fiscus_core::{CoreResult, ManualClock, MemoryTraceSink};
use fiscus_jobs::scheduler::ScheduleDeps;
use fiscus_jobs::{CronScheduler, JobsConfig, MemoryStore, QueueManager, StoreKeys};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Collaborator fakes
// ============================================================================

#[derive(Default)]
pub struct FakeConnections {
    pub connections: Mutex<Vec<Connection>>,
    pub outcomes: Mutex<Vec<(String, SyncOutcome)>>,
    pub counts: Mutex<ConnectionCounts>,
    pub health_marks: Mutex<Vec<String>>,
}

#[async_trait]
impl ConnectionDirectory for FakeConnections {
    async fn find(&self, connection_id: &str) -> CoreResult<Option<Connection>> {
        Ok(self
            .connections
            .lock()
            .iter()
            .find(|c| c.id == connection_id)
            .cloned())
    }

    async fn connections_with_provider(&self, provider: &str) -> CoreResult<Vec<Connection>> {
        Ok(self
            .connections
            .lock()
            .iter()
            .filter(|c| c.provider == provider)
            .cloned()
            .collect())
    }

    async fn find_by_user_and_provider(
        &self,
        user_id: &str,
        provider: &str,
    ) -> CoreResult<Option<Connection>> {
        Ok(self
            .connections
            .lock()
            .iter()
            .find(|c| c.user_id == user_id && c.provider == provider)
            .cloned())
    }

    async fn decrypt_credentials(
        &self,
        _connection: &Connection,
    ) -> CoreResult<ProviderCredentials> {
        Ok(ProviderCredentials {
            access_token: "token".into(),
            refresh_token: None,
        })
    }

    async fn record_sync_outcome(
        &self,
        connection_id: &str,
        outcome: &SyncOutcome,
    ) -> CoreResult<()> {
        self.outcomes
            .lock()
            .push((connection_id.to_string(), outcome.clone()));
        Ok(())
    }

    async fn connection_counts(&self) -> CoreResult<ConnectionCounts> {
        Ok(*self.counts.lock())
    }

    async fn mark_provider_health(
        &self,
        provider: &str,
        _healthy_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        self.health_marks.lock().push(provider.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSpaces {
    pub spaces: Mutex<Vec<String>>,
    pub accounts: Mutex<HashMap<String, Vec<Account>>>,
    pub crypto_symbols: Mutex<Vec<String>>,
    pub read_only_manual_users: Mutex<Vec<String>>,
}

#[async_trait]
impl SpaceDirectory for FakeSpaces {
    async fn space_ids(&self) -> CoreResult<Vec<String>> {
        Ok(self.spaces.lock().clone())
    }

    async fn accounts_in_space(&self, space_id: &str) -> CoreResult<Vec<Account>> {
        Ok(self
            .accounts
            .lock()
            .get(space_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn observed_crypto_symbols(&self) -> CoreResult<Vec<String>> {
        Ok(self.crypto_symbols.lock().clone())
    }

    async fn users_with_read_only_manual_accounts(&self) -> CoreResult<Vec<String>> {
        Ok(self.read_only_manual_users.lock().clone())
    }

    async fn spaces_with_linked_accounts(&self) -> CoreResult<Vec<String>> {
        let accounts = self.accounts.lock();
        Ok(accounts
            .iter()
            .filter(|(_, list)| list.iter().any(|a| !a.is_manual()))
            .map(|(space, _)| space.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct FakeCategorizer {
    pub batches: Mutex<Vec<String>>,
}

#[async_trait]
impl Categorizer for FakeCategorizer {
    async fn categorize_transactions(
        &self,
        _space_id: &str,
        transaction_ids: &[String],
    ) -> CoreResult<CategorizeStats> {
        Ok(CategorizeStats {
            categorized: transaction_ids.len() as u64,
            total: transaction_ids.len() as u64,
        })
    }

    async fn categorize_uncategorized(&self, space_id: &str) -> CoreResult<CategorizeStats> {
        self.batches.lock().push(space_id.to_string());
        Ok(CategorizeStats {
            categorized: 5,
            total: 5,
        })
    }
}

#[derive(Default)]
pub struct FakePatterns {
    pub retrained: Mutex<Vec<String>>,
    pub invalidated: Mutex<Vec<String>>,
    pub recent_correction_spaces: Mutex<Vec<String>>,
    pub deleted_days: Mutex<Vec<u32>>,
}

#[async_trait]
impl PatternModel for FakePatterns {
    async fn retrain_space(&self, space_id: &str) -> CoreResult<()> {
        self.retrained.lock().push(space_id.to_string());
        Ok(())
    }

    async fn delete_corrections_older_than(&self, days: u32) -> CoreResult<u64> {
        self.deleted_days.lock().push(days);
        Ok(3)
    }

    async fn spaces_with_corrections_since(
        &self,
        _cutoff: DateTime<Utc>,
    ) -> CoreResult<Vec<String>> {
        Ok(self.recent_correction_spaces.lock().clone())
    }

    async fn invalidate_cache(&self, space_id: &str) -> CoreResult<()> {
        self.invalidated.lock().push(space_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeUsers {
    pub life_beat: Mutex<Vec<LifeBeatUser>>,
    pub weekly: Mutex<Vec<ReportSubscriber>>,
    pub monthly: Mutex<Vec<ReportSubscriber>>,
    pub emails: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl fiscus_core::domain::UserDirectory for FakeUsers {
    async fn life_beat_users(&self) -> CoreResult<Vec<LifeBeatUser>> {
        Ok(self.life_beat.lock().clone())
    }

    async fn report_subscribers(
        &self,
        cadence: ReportCadence,
    ) -> CoreResult<Vec<ReportSubscriber>> {
        Ok(match cadence {
            ReportCadence::Weekly => self.weekly.lock().clone(),
            ReportCadence::Monthly => self.monthly.lock().clone(),
        })
    }

    async fn email_for(&self, user_id: &str) -> CoreResult<Option<String>> {
        Ok(self.emails.lock().get(user_id).cloned())
    }
}

pub struct FakeReports;

#[async_trait]
impl ReportBuilder for FakeReports {
    async fn build(
        &self,
        space_id: &str,
        range: ReportRange,
        format: ReportFormat,
    ) -> CoreResult<ReportFile> {
        let extension = match format {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Csv => "csv",
            ReportFormat::Xlsx => "xlsx",
        };
        Ok(ReportFile {
            file_name: format!("{space_id}-{}-{}.{extension}", range.start, range.end),
            content_type: "application/octet-stream".into(),
            bytes: b"report".to_vec(),
        })
    }
}

#[derive(Default)]
pub struct FakeHealth {
    pub states: Mutex<HashMap<String, AccountHealth>>,
}

#[async_trait]
impl ProviderHealthCheck for FakeHealth {
    async fn classify(&self, account: &Account) -> CoreResult<AccountHealth> {
        Ok(self
            .states
            .lock()
            .get(&account.id)
            .copied()
            .unwrap_or(AccountHealth::Ok))
    }
}

pub struct FakeProperty {
    pub available: Mutex<bool>,
    pub properties: Mutex<Vec<String>>,
    pub refreshed: Mutex<Vec<String>>,
}

impl Default for FakeProperty {
    fn default() -> Self {
        Self {
            available: Mutex::new(false),
            properties: Mutex::new(Vec::new()),
            refreshed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PropertyValuationApi for FakeProperty {
    async fn is_available(&self) -> bool {
        *self.available.lock()
    }

    async fn refresh_property(&self, property_id: &str) -> CoreResult<()> {
        self.refreshed.lock().push(property_id.to_string());
        Ok(())
    }

    async fn properties_in_space(&self, _space_id: &str) -> CoreResult<Vec<String>> {
        Ok(self.properties.lock().clone())
    }

    async fn all_properties(&self) -> CoreResult<Vec<String>> {
        Ok(self.properties.lock().clone())
    }
}

#[derive(Default)]
pub struct FakeEmailGateway {
    pub delivered: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl EmailGateway for FakeEmailGateway {
    async fn deliver(
        &self,
        to: &str,
        template: &str,
        _data: &serde_json::Value,
        _attachments: &[EmailAttachment],
    ) -> CoreResult<()> {
        self.delivered
            .lock()
            .push((to.to_string(), template.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSnapshots {
    pub written: Mutex<Vec<ValuationSnapshot>>,
}

#[async_trait]
impl SnapshotRepository for FakeSnapshots {
    async fn upsert(&self, snapshot: &ValuationSnapshot) -> CoreResult<()> {
        self.written.lock().push(snapshot.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeEsg {
    pub refreshed: Mutex<Vec<String>>,
}

#[async_trait]
impl EsgProvider for FakeEsg {
    async fn refresh_symbol(&self, symbol: &str) -> CoreResult<()> {
        self.refreshed.lock().push(symbol.to_string());
        Ok(())
    }

    async fn clear_cache(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn cache_stats(&self) -> CoreResult<EsgCacheStats> {
        Ok(EsgCacheStats::default())
    }
}

pub struct FakeAdapter {
    pub provider: String,
    pub synced: Mutex<Vec<String>>,
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn sync_transactions(
        &self,
        connection: &Connection,
        _credentials: &ProviderCredentials,
        _full_sync: bool,
    ) -> CoreResult<SyncStats> {
        self.synced.lock().push(connection.id.clone());
        Ok(SyncStats::default())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub sink: Arc<MemoryTraceSink>,
    pub manager: Arc<QueueManager>,
    pub scheduler: CronScheduler,
    pub connections: Arc<FakeConnections>,
    pub spaces: Arc<FakeSpaces>,
    pub patterns: Arc<FakePatterns>,
    pub users: Arc<FakeUsers>,
    pub health: Arc<FakeHealth>,
    pub property: Arc<FakeProperty>,
}

impl Harness {
    /// Fully wired manager + fixed-schedule scheduler over the memory
    /// backend with a manual clock.
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::start_now());
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let sink = Arc::new(MemoryTraceSink::new());
        let config = JobsConfig::default();
        let keys = StoreKeys::new(config.redis.key_prefix.clone());

        let manager = Arc::new(QueueManager::new(
            store.clone(),
            clock.clone(),
            sink.clone(),
            config,
        ));

        let connections = Arc::new(FakeConnections::default());
        let spaces = Arc::new(FakeSpaces::default());
        let patterns = Arc::new(FakePatterns::default());
        let users = Arc::new(FakeUsers::default());
        let health = Arc::new(FakeHealth::default());
        let property = Arc::new(FakeProperty::default());

        let deps = ScheduleDeps {
            manager: manager.clone(),
            store: store.clone(),
            keys,
            clock: clock.clone(),
            connections: connections.clone(),
            spaces: spaces.clone(),
            patterns: patterns.clone(),
            users: users.clone(),
            reports: Arc::new(FakeReports),
            health: health.clone(),
            property_api: property.clone(),
        };

        let scheduler = CronScheduler::with_fixed_schedules(
            deps,
            sink.clone(),
            Duration::from_millis(10),
        )
        .expect("fixed schedule table builds");

        Self {
            clock,
            store,
            sink,
            manager,
            scheduler,
            connections,
            spaces,
            patterns,
            users,
            health,
            property,
        }
    }

    pub async fn waiting(&self, queue: &str) -> u64 {
        self.manager.queue_stats(queue).await.unwrap().waiting
    }
}
