//! Property valuation refresh processor.

use super::payload_mismatch;
use crate::error::JobError;
use crate::job::{JobContext, JobKind, JobPayload, PropertyValuationRequest};
use crate::worker::Processor;
use async_trait::async_trait;
use fiscus_core::domain::PropertyValuationApi;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Pacing gap between refresh-all requests to the external API.
const REFRESH_ALL_PACING: Duration = Duration::from_millis(500);

/// Refreshes property valuations for one property, one space, or the whole
/// portfolio.
pub struct PropertyValuationProcessor {
    api: Arc<dyn PropertyValuationApi>,
}

impl PropertyValuationProcessor {
    pub fn new(api: Arc<dyn PropertyValuationApi>) -> Self {
        Self { api }
    }

    async fn refresh_paced(&self, property_ids: &[String]) -> Result<u64, JobError> {
        let mut refreshed = 0u64;
        for (index, property_id) in property_ids.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(REFRESH_ALL_PACING).await;
            }
            self.api.refresh_property(property_id).await?;
            refreshed += 1;
        }
        Ok(refreshed)
    }
}

#[async_trait]
impl Processor for PropertyValuationProcessor {
    fn kind(&self) -> JobKind {
        JobKind::PropertyValuation
    }

    async fn run(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError> {
        let JobPayload::PropertyValuation { request } = &ctx.payload else {
            return Err(payload_mismatch(self.kind(), ctx.payload.kind()));
        };

        let refreshed = match request {
            PropertyValuationRequest::RefreshSingle { property_id } => {
                self.api.refresh_property(property_id).await?;
                1
            }
            PropertyValuationRequest::RefreshSpace { space_id } => {
                let property_ids = self.api.properties_in_space(space_id).await?;
                let mut refreshed = 0u64;
                for property_id in &property_ids {
                    self.api.refresh_property(property_id).await?;
                    refreshed += 1;
                }
                refreshed
            }
            PropertyValuationRequest::RefreshAll => {
                let property_ids = self.api.all_properties().await?;
                self.refresh_paced(&property_ids).await?
            }
        };

        debug!(refreshed, "Property valuation refresh finished");
        Ok(serde_json::json!({ "refreshed": refreshed }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use fiscus_core::CoreResult;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    struct FakeApi {
        properties: Vec<String>,
        refreshed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PropertyValuationApi for FakeApi {
        async fn is_available(&self) -> bool {
            true
        }

        async fn refresh_property(&self, property_id: &str) -> CoreResult<()> {
            self.refreshed.lock().push(property_id.to_string());
            Ok(())
        }

        async fn properties_in_space(&self, _space_id: &str) -> CoreResult<Vec<String>> {
            Ok(self.properties.clone())
        }

        async fn all_properties(&self) -> CoreResult<Vec<String>> {
            Ok(self.properties.clone())
        }
    }

    fn ctx(request: PropertyValuationRequest) -> JobContext {
        JobContext {
            job_id: JobId::from("property-1"),
            queue: "property-valuation".into(),
            attempt: 1,
            max_attempts: 3,
            user_id: None,
            payload: JobPayload::PropertyValuation { request },
        }
    }

    #[tokio::test]
    async fn test_refresh_single() {
        let api = Arc::new(FakeApi {
            properties: vec![],
            refreshed: Mutex::new(Vec::new()),
        });
        let processor = PropertyValuationProcessor::new(api.clone());

        let result = processor
            .run(&ctx(PropertyValuationRequest::RefreshSingle {
                property_id: "p-1".into(),
            }))
            .await
            .unwrap();

        assert_eq!(result["refreshed"], 1);
        assert_eq!(api.refreshed.lock().as_slice(), &["p-1"]);
    }

    #[tokio::test]
    async fn test_refresh_space_covers_all_space_properties() {
        let api = Arc::new(FakeApi {
            properties: vec!["p-1".into(), "p-2".into()],
            refreshed: Mutex::new(Vec::new()),
        });
        let processor = PropertyValuationProcessor::new(api.clone());

        let result = processor
            .run(&ctx(PropertyValuationRequest::RefreshSpace {
                space_id: "s-1".into(),
            }))
            .await
            .unwrap();

        assert_eq!(result["refreshed"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_all_paces_between_requests() {
        let api = Arc::new(FakeApi {
            properties: vec!["p-1".into(), "p-2".into(), "p-3".into()],
            refreshed: Mutex::new(Vec::new()),
        });
        let processor = PropertyValuationProcessor::new(api.clone());

        let started = Instant::now();
        let result = processor
            .run(&ctx(PropertyValuationRequest::RefreshAll))
            .await
            .unwrap();

        // Two pacing gaps for three properties; paused time auto-advances.
        assert_eq!(result["refreshed"], 3);
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }
}
