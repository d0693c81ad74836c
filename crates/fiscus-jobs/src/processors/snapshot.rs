//! Valuation snapshot processor.

use super::payload_mismatch;
use crate::error::JobError;
use crate::job::{JobContext, JobKind, JobPayload};
use crate::worker::Processor;
use async_trait::async_trait;
use fiscus_core::domain::{SnapshotRepository, SpaceDirectory, ValuationSnapshot};
use fiscus_core::{Clock, SharedClock};
use std::sync::Arc;
use tracing::info;

/// Upserts a day-granular snapshot for every account in the space and
/// reports the space's net worth.
pub struct SnapshotProcessor {
    spaces: Arc<dyn SpaceDirectory>,
    snapshots: Arc<dyn SnapshotRepository>,
    clock: SharedClock,
}

impl SnapshotProcessor {
    pub fn new(
        spaces: Arc<dyn SpaceDirectory>,
        snapshots: Arc<dyn SnapshotRepository>,
        clock: SharedClock,
    ) -> Self {
        Self {
            spaces,
            snapshots,
            clock,
        }
    }
}

#[async_trait]
impl Processor for SnapshotProcessor {
    fn kind(&self) -> JobKind {
        JobKind::ValuationSnapshot
    }

    async fn run(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError> {
        let JobPayload::ValuationSnapshot { space_id, date } = &ctx.payload else {
            return Err(payload_mismatch(self.kind(), ctx.payload.kind()));
        };
        let date = date.unwrap_or_else(|| self.clock.now().date_naive());

        let accounts = self.spaces.accounts_in_space(space_id).await?;

        let mut total_assets = 0.0f64;
        let mut total_liabilities = 0.0f64;
        let mut snapshots = 0u64;

        for account in &accounts {
            self.snapshots
                .upsert(&ValuationSnapshot {
                    account_id: account.id.clone(),
                    space_id: space_id.clone(),
                    date,
                    balance: account.balance,
                    currency: account.currency.clone(),
                })
                .await?;
            snapshots += 1;

            if account.account_type.is_asset() {
                total_assets += account.balance;
            } else if account.account_type.is_liability() {
                total_liabilities += account.balance.abs();
            }
        }

        let net_worth = total_assets - total_liabilities;
        info!(
            space_id = %space_id,
            date = %date,
            accounts = accounts.len(),
            net_worth,
            "Valuation snapshot written"
        );

        Ok(serde_json::json!({
            "accounts": accounts.len(),
            "snapshots": snapshots,
            "netWorth": net_worth,
            "totalAssets": total_assets,
            "totalLiabilities": total_liabilities,
        }))
    }
}
