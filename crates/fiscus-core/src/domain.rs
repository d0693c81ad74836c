//! Domain collaborator interfaces.
//!
//! The queue core calls into the rest of the platform exclusively through
//! these traits. Concrete implementations (SQL repositories, provider SDKs,
//! the mailer) live in the hosting service; tests supply in-memory fakes.

use crate::error::CoreResult;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Connections and providers
// ============================================================================

/// Lifecycle state of a provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Stale,
    Errored,
    RequiresReauth,
}

/// A persisted link between a user and an external data provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub status: ConnectionStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Decrypted provider credentials, never persisted in this form.
#[derive(Clone)]
pub struct ProviderCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Result of one provider sync, written back to the connection's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub last_sync_at: DateTime<Utc>,
    pub last_sync_result: String,
    pub last_sync_duration_ms: u64,
}

/// Aggregate connection counts used by the session-cleanup schedule.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConnectionCounts {
    pub active: u64,
    pub stale: u64,
}

/// Access to persisted provider connections.
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    /// Load a connection by id.
    async fn find(&self, connection_id: &str) -> CoreResult<Option<Connection>>;

    /// Every connection to `provider`.
    async fn connections_with_provider(&self, provider: &str) -> CoreResult<Vec<Connection>>;

    /// A user's connection to `provider`, if one exists.
    async fn find_by_user_and_provider(
        &self,
        user_id: &str,
        provider: &str,
    ) -> CoreResult<Option<Connection>>;

    /// Decrypt the stored tokens for a connection.
    async fn decrypt_credentials(&self, connection: &Connection)
        -> CoreResult<ProviderCredentials>;

    /// Persist the outcome of a sync run into the connection's metadata.
    async fn record_sync_outcome(
        &self,
        connection_id: &str,
        outcome: &SyncOutcome,
    ) -> CoreResult<()>;

    /// Active vs stale connection counts.
    async fn connection_counts(&self) -> CoreResult<ConnectionCounts>;

    /// Stamp the last-known-healthy time for a provider.
    async fn mark_provider_health(
        &self,
        provider: &str,
        healthy_at: DateTime<Utc>,
    ) -> CoreResult<()>;
}

/// Transaction totals reported by one provider sync.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub fetched: u64,
    pub created: u64,
    pub updated: u64,
}

/// Adapter for one external data provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider discriminant ("bitso", "blockchain", ...).
    fn provider(&self) -> &str;

    /// Pull transactions for a connection. Adapters embed their own
    /// timeouts and rate-limit coordination.
    async fn sync_transactions(
        &self,
        connection: &Connection,
        credentials: &ProviderCredentials,
        full_sync: bool,
    ) -> CoreResult<SyncStats>;
}

// ============================================================================
// Spaces and accounts
// ============================================================================

/// Account classification used for net-worth arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
    Investment,
    Crypto,
    Credit,
    Property,
    Other,
}

impl AccountType {
    /// Asset-side types for net-worth computation.
    pub fn is_asset(self) -> bool {
        matches!(
            self,
            AccountType::Checking
                | AccountType::Savings
                | AccountType::Investment
                | AccountType::Crypto
        )
    }

    /// Liability-side types.
    pub fn is_liability(self) -> bool {
        matches!(self, AccountType::Credit)
    }
}

/// A financial account inside a space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub space_id: String,
    pub user_id: String,
    pub account_type: AccountType,
    pub currency: String,
    pub balance: f64,
    /// Provider backing this account; `None` for manual accounts.
    pub provider: Option<String>,
    pub read_only: bool,
}

impl Account {
    /// Accounts with no backing provider are maintained by hand.
    pub fn is_manual(&self) -> bool {
        self.provider.is_none()
    }
}

/// Access to spaces and their accounts.
#[async_trait]
pub trait SpaceDirectory: Send + Sync {
    /// All known space ids.
    async fn space_ids(&self) -> CoreResult<Vec<String>>;

    /// Accounts belonging to a space.
    async fn accounts_in_space(&self, space_id: &str) -> CoreResult<Vec<Account>>;

    /// Distinct crypto symbols observed across all crypto accounts.
    async fn observed_crypto_symbols(&self) -> CoreResult<Vec<String>>;

    /// Distinct user ids owning at least one read-only manual account.
    async fn users_with_read_only_manual_accounts(&self) -> CoreResult<Vec<String>>;

    /// Space ids with at least one non-manual account.
    async fn spaces_with_linked_accounts(&self) -> CoreResult<Vec<String>>;
}

// ============================================================================
// Categorization and ML patterns
// ============================================================================

/// Outcome of a categorization batch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CategorizeStats {
    pub categorized: u64,
    pub total: u64,
}

/// Transaction categorization engine.
#[async_trait]
pub trait Categorizer: Send + Sync {
    /// Categorize the given transactions only.
    async fn categorize_transactions(
        &self,
        space_id: &str,
        transaction_ids: &[String],
    ) -> CoreResult<CategorizeStats>;

    /// Batch-categorize every uncategorized transaction in the space.
    async fn categorize_uncategorized(&self, space_id: &str) -> CoreResult<CategorizeStats>;
}

/// Per-space categorization pattern model maintenance.
#[async_trait]
pub trait PatternModel: Send + Sync {
    /// Retrain patterns for one space from accumulated corrections.
    async fn retrain_space(&self, space_id: &str) -> CoreResult<()>;

    /// Delete raw corrections older than the given number of days.
    /// Returns the number of rows removed.
    async fn delete_corrections_older_than(&self, days: u32) -> CoreResult<u64>;

    /// Space ids with corrections recorded since `cutoff`.
    async fn spaces_with_corrections_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<Vec<String>>;

    /// Drop the cached patterns for a space.
    async fn invalidate_cache(&self, space_id: &str) -> CoreResult<()>;
}

// ============================================================================
// ESG
// ============================================================================

/// ESG cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EsgCacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
}

/// ESG scoring data source with a cache in front.
#[async_trait]
pub trait EsgProvider: Send + Sync {
    /// Refresh ESG data for one symbol.
    async fn refresh_symbol(&self, symbol: &str) -> CoreResult<()>;

    /// Drop every cached ESG record.
    async fn clear_cache(&self) -> CoreResult<()>;

    /// Current cache counters.
    async fn cache_stats(&self) -> CoreResult<EsgCacheStats>;
}

// ============================================================================
// Valuation snapshots
// ============================================================================

/// Day-granular balance snapshot for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationSnapshot {
    pub account_id: String,
    pub space_id: String,
    pub date: NaiveDate,
    pub balance: f64,
    pub currency: String,
}

/// Persistence for valuation snapshots.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Insert or replace the snapshot for (account, date).
    async fn upsert(&self, snapshot: &ValuationSnapshot) -> CoreResult<()>;
}

// ============================================================================
// Email
// ============================================================================

/// A file attached to an outgoing email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAttachment {
    pub file_name: String,
    pub content_type: String,
    /// Base64-encoded file body; payloads must stay JSON-serializable.
    pub content_base64: String,
}

impl EmailAttachment {
    /// Encode raw bytes into an attachment.
    pub fn from_bytes(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        use base64::Engine as _;
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// Templated email delivery.
#[async_trait]
pub trait EmailGateway: Send + Sync {
    /// Render `template` with `data` and deliver to `to`.
    async fn deliver(
        &self,
        to: &str,
        template: &str,
        data: &serde_json::Value,
        attachments: &[EmailAttachment],
    ) -> CoreResult<()>;
}

// ============================================================================
// Property valuation
// ============================================================================

/// External property-valuation API.
#[async_trait]
pub trait PropertyValuationApi: Send + Sync {
    /// Whether the external API is currently reachable/enabled.
    async fn is_available(&self) -> bool;

    /// Refresh the valuation of one property.
    async fn refresh_property(&self, property_id: &str) -> CoreResult<()>;

    /// Property ids in one space.
    async fn properties_in_space(&self, space_id: &str) -> CoreResult<Vec<String>>;

    /// Every known property id.
    async fn all_properties(&self) -> CoreResult<Vec<String>>;
}

// ============================================================================
// Connection health classification
// ============================================================================

/// Health classification for one linked account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountHealth {
    Ok,
    Degraded,
    Error,
    RequiresReauth,
}

impl AccountHealth {
    /// True when the state warrants a user notification.
    pub fn needs_attention(self) -> bool {
        !matches!(self, AccountHealth::Ok)
    }
}

/// Classifier for linked-account health.
#[async_trait]
pub trait ProviderHealthCheck: Send + Sync {
    /// Classify one account's connectivity.
    async fn classify(&self, account: &Account) -> CoreResult<AccountHealth>;
}

// ============================================================================
// Users, life-beat, reports
// ============================================================================

/// An executor configured to be notified at the final inactivity level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Executor {
    pub id: String,
    pub email: String,
    pub verified: bool,
}

/// A user with the life-beat inactivity monitor enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifeBeatUser {
    pub user_id: String,
    pub email: String,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    /// Alert thresholds in days, ascending.
    pub alert_days: Vec<u32>,
    pub executors: Vec<Executor>,
}

/// Report cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportCadence {
    Weekly,
    Monthly,
}

/// Preferred report file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Pdf,
    Csv,
    Xlsx,
}

/// A user subscribed to periodic reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSubscriber {
    pub user_id: String,
    pub email: String,
    pub space_ids: Vec<String>,
    pub format: ReportFormat,
}

/// User lookups for the inactivity monitor and report schedules.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Users with life-beat enabled.
    async fn life_beat_users(&self) -> CoreResult<Vec<LifeBeatUser>>;

    /// Users subscribed to reports at the given cadence.
    async fn report_subscribers(&self, cadence: ReportCadence) -> CoreResult<Vec<ReportSubscriber>>;

    /// Notification address for a user.
    async fn email_for(&self, user_id: &str) -> CoreResult<Option<String>>;
}

/// Inclusive date range covered by a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// A rendered report file.
#[derive(Debug, Clone)]
pub struct ReportFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Report rendering.
#[async_trait]
pub trait ReportBuilder: Send + Sync {
    /// Build a report for one space over a date range.
    async fn build(
        &self,
        space_id: &str,
        range: ReportRange,
        format: ReportFormat,
    ) -> CoreResult<ReportFile>;
}
