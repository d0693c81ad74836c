//! Provider transaction sync processor.

use super::payload_mismatch;
use crate::error::{JobError, JobResult};
use crate::job::{JobContext, JobKind, JobPayload};
use crate::worker::Processor;
use async_trait::async_trait;
use fiscus_core::domain::{ConnectionDirectory, ProviderAdapter, SyncOutcome};
use fiscus_core::{Clock, SharedClock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Syncs a provider connection: loads the persistent connection record,
/// enforces ownership, branches by provider, and writes sync metadata back.
pub struct SyncProcessor {
    connections: Arc<dyn ConnectionDirectory>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    clock: SharedClock,
}

impl SyncProcessor {
    /// Build over a connection directory and a provider adapter registry.
    pub fn new(
        connections: Arc<dyn ConnectionDirectory>,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        clock: SharedClock,
    ) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|a| (a.provider().to_string(), a))
            .collect();
        Self {
            connections,
            adapters,
            clock,
        }
    }
}

#[async_trait]
impl Processor for SyncProcessor {
    fn kind(&self) -> JobKind {
        JobKind::SyncTransactions
    }

    async fn run(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError> {
        let JobPayload::SyncTransactions {
            provider,
            user_id,
            connection_id,
            full_sync,
        } = &ctx.payload
        else {
            return Err(payload_mismatch(self.kind(), ctx.payload.kind()));
        };

        let connection = self
            .connections
            .find(connection_id)
            .await?
            .ok_or_else(|| JobError::Domain(format!("connection not found: {connection_id}")))?;

        if connection.user_id != *user_id {
            return Err(JobError::Domain(format!(
                "connection {connection_id} does not belong to user {user_id}"
            )));
        }

        let adapter = self.adapters.get(provider).ok_or_else(|| {
            JobError::Domain(format!("unsupported provider: {provider}"))
        })?;

        let credentials = self.connections.decrypt_credentials(&connection).await?;

        let started = Instant::now();
        let result = adapter
            .sync_transactions(&connection, &credentials, *full_sync)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(stats) => {
                let outcome = SyncOutcome {
                    last_sync_at: self.clock.now(),
                    last_sync_result: "ok".to_string(),
                    last_sync_duration_ms: duration_ms,
                };
                self.connections
                    .record_sync_outcome(connection_id, &outcome)
                    .await?;

                info!(
                    connection_id = %connection_id,
                    provider = %provider,
                    fetched = stats.fetched,
                    duration_ms,
                    "Provider sync finished"
                );
                Ok(serde_json::json!({
                    "fetched": stats.fetched,
                    "created": stats.created,
                    "updated": stats.updated,
                    "durationMs": duration_ms,
                }))
            }
            Err(e) => {
                // Best-effort metadata write; the failure itself drives retry.
                let outcome = SyncOutcome {
                    last_sync_at: self.clock.now(),
                    last_sync_result: format!("error: {e}"),
                    last_sync_duration_ms: duration_ms,
                };
                if let Err(write_err) = self
                    .connections
                    .record_sync_outcome(connection_id, &outcome)
                    .await
                {
                    warn!(
                        connection_id = %connection_id,
                        error = %write_err,
                        "Failed to record sync error metadata"
                    );
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use fiscus_core::domain::{
        Connection, ConnectionCounts, ConnectionStatus, ProviderCredentials, SyncStats,
    };
    use fiscus_core::{CoreError, CoreResult, SystemClock};
    use parking_lot::Mutex;

    struct FakeConnections {
        connection: Option<Connection>,
        outcomes: Mutex<Vec<SyncOutcome>>,
    }

    #[async_trait]
    impl ConnectionDirectory for FakeConnections {
        async fn find(&self, _connection_id: &str) -> CoreResult<Option<Connection>> {
            Ok(self.connection.clone())
        }

        async fn connections_with_provider(&self, _provider: &str) -> CoreResult<Vec<Connection>> {
            Ok(self.connection.clone().into_iter().collect())
        }

        async fn find_by_user_and_provider(
            &self,
            _user_id: &str,
            _provider: &str,
        ) -> CoreResult<Option<Connection>> {
            Ok(self.connection.clone())
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
            _connection_id: &str,
            outcome: &SyncOutcome,
        ) -> CoreResult<()> {
            self.outcomes.lock().push(outcome.clone());
            Ok(())
        }

        async fn connection_counts(&self) -> CoreResult<ConnectionCounts> {
            Ok(ConnectionCounts::default())
        }

        async fn mark_provider_health(
            &self,
            _provider: &str,
            _healthy_at: chrono::DateTime<chrono::Utc>,
        ) -> CoreResult<()> {
            Ok(())
        }
    }

    struct FakeAdapter {
        fail: bool,
    }

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        fn provider(&self) -> &str {
            "bitso"
        }

        async fn sync_transactions(
            &self,
            _connection: &Connection,
            _credentials: &ProviderCredentials,
            _full_sync: bool,
        ) -> CoreResult<SyncStats> {
            if self.fail {
                Err(CoreError::provider("bitso", "rate limited"))
            } else {
                Ok(SyncStats {
                    fetched: 12,
                    created: 3,
                    updated: 1,
                })
            }
        }
    }

    fn ctx(user_id: &str) -> JobContext {
        JobContext {
            job_id: JobId::from("sync-1"),
            queue: "sync-transactions".into(),
            attempt: 1,
            max_attempts: 5,
            user_id: Some(user_id.to_string()),
            payload: JobPayload::SyncTransactions {
                provider: "bitso".into(),
                user_id: user_id.into(),
                connection_id: "c-1".into(),
                full_sync: false,
            },
        }
    }

    fn connection(user_id: &str) -> Connection {
        Connection {
            id: "c-1".into(),
            user_id: user_id.into(),
            provider: "bitso".into(),
            status: ConnectionStatus::Active,
            last_sync_at: None,
        }
    }

    fn processor(connections: Arc<FakeConnections>, fail: bool) -> SyncProcessor {
        SyncProcessor::new(
            connections,
            vec![Arc::new(FakeAdapter { fail })],
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn test_successful_sync_records_outcome() {
        let connections = Arc::new(FakeConnections {
            connection: Some(connection("u-1")),
            outcomes: Mutex::new(Vec::new()),
        });
        let result = processor(connections.clone(), false)
            .run(&ctx("u-1"))
            .await
            .unwrap();

        assert_eq!(result["fetched"], 12);
        let outcomes = connections.outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].last_sync_result, "ok");
    }

    #[tokio::test]
    async fn test_missing_connection_is_domain_error() {
        let connections = Arc::new(FakeConnections {
            connection: None,
            outcomes: Mutex::new(Vec::new()),
        });
        let err = processor(connections, false)
            .run(&ctx("u-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Domain(_)));
    }

    #[tokio::test]
    async fn test_ownership_mismatch_is_domain_error() {
        let connections = Arc::new(FakeConnections {
            connection: Some(connection("someone-else")),
            outcomes: Mutex::new(Vec::new()),
        });
        let err = processor(connections, false)
            .run(&ctx("u-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Domain(_)));
    }

    #[tokio::test]
    async fn test_provider_failure_propagates_with_error_metadata() {
        let connections = Arc::new(FakeConnections {
            connection: Some(connection("u-1")),
            outcomes: Mutex::new(Vec::new()),
        });
        let err = processor(connections.clone(), true)
            .run(&ctx("u-1"))
            .await
            .unwrap_err();

        assert_eq!(err.domain_kind(), "provider");
        let outcomes = connections.outcomes.lock();
        assert!(outcomes[0].last_sync_result.starts_with("error:"));
    }
}
