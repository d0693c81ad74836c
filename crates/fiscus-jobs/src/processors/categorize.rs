//! Transaction categorization processor.

use super::payload_mismatch;
use crate::error::JobError;
use crate::job::{JobContext, JobKind, JobPayload};
use crate::worker::Processor;
use async_trait::async_trait;
use fiscus_core::domain::Categorizer;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Categorizes either an explicit transaction set or every uncategorized
/// transaction in the space.
pub struct CategorizeProcessor {
    categorizer: Arc<dyn Categorizer>,
}

impl CategorizeProcessor {
    pub fn new(categorizer: Arc<dyn Categorizer>) -> Self {
        Self { categorizer }
    }
}

#[async_trait]
impl Processor for CategorizeProcessor {
    fn kind(&self) -> JobKind {
        JobKind::CategorizeTransactions
    }

    async fn run(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError> {
        let JobPayload::CategorizeTransactions {
            space_id,
            transaction_ids,
        } = &ctx.payload
        else {
            return Err(payload_mismatch(self.kind(), ctx.payload.kind()));
        };

        let started = Instant::now();
        let stats = if transaction_ids.is_empty() {
            self.categorizer.categorize_uncategorized(space_id).await?
        } else {
            self.categorizer
                .categorize_transactions(space_id, transaction_ids)
                .await?
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        debug!(
            space_id = %space_id,
            categorized = stats.categorized,
            total = stats.total,
            duration_ms,
            "Categorization batch finished"
        );

        Ok(serde_json::json!({
            "categorized": stats.categorized,
            "total": stats.total,
            "durationMs": duration_ms,
        }))
    }
}
