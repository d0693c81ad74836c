//! ESG data refresh processor.

use super::payload_mismatch;
use crate::error::JobError;
use crate::job::{JobContext, JobKind, JobPayload};
use crate::worker::Processor;
use async_trait::async_trait;
use fiscus_core::domain::EsgProvider;
use std::sync::Arc;
use tracing::debug;

/// Refreshes ESG data per symbol, optionally clearing the cache first.
pub struct EsgProcessor {
    esg: Arc<dyn EsgProvider>,
}

impl EsgProcessor {
    pub fn new(esg: Arc<dyn EsgProvider>) -> Self {
        Self { esg }
    }
}

#[async_trait]
impl Processor for EsgProcessor {
    fn kind(&self) -> JobKind {
        JobKind::EsgUpdate
    }

    async fn run(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError> {
        let JobPayload::EsgUpdate {
            symbols,
            force_refresh,
        } = &ctx.payload
        else {
            return Err(payload_mismatch(self.kind(), ctx.payload.kind()));
        };

        if *force_refresh {
            self.esg.clear_cache().await?;
            debug!("Cleared ESG cache before refresh");
        }

        for symbol in symbols {
            self.esg.refresh_symbol(symbol).await?;
        }

        let cache_stats = self.esg.cache_stats().await?;
        Ok(serde_json::json!({
            "symbolsUpdated": symbols.len(),
            "cacheStats": {
                "entries": cache_stats.entries,
                "hits": cache_stats.hits,
                "misses": cache_stats.misses,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use fiscus_core::domain::EsgCacheStats;
    use fiscus_core::CoreResult;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeEsg {
        refreshed: Mutex<Vec<String>>,
        cleared: Mutex<u32>,
    }

    #[async_trait]
    impl EsgProvider for FakeEsg {
        async fn refresh_symbol(&self, symbol: &str) -> CoreResult<()> {
            self.refreshed.lock().push(symbol.to_string());
            Ok(())
        }

        async fn clear_cache(&self) -> CoreResult<()> {
            *self.cleared.lock() += 1;
            Ok(())
        }

        async fn cache_stats(&self) -> CoreResult<EsgCacheStats> {
            Ok(EsgCacheStats {
                entries: self.refreshed.lock().len() as u64,
                hits: 4,
                misses: 1,
            })
        }
    }

    fn ctx(symbols: Vec<String>, force_refresh: bool) -> JobContext {
        JobContext {
            job_id: JobId::from("esg-1"),
            queue: "esg-updates".into(),
            attempt: 1,
            max_attempts: 3,
            user_id: None,
            payload: JobPayload::EsgUpdate {
                symbols,
                force_refresh,
            },
        }
    }

    #[tokio::test]
    async fn test_refreshes_each_symbol() {
        let esg = Arc::new(FakeEsg::default());
        let processor = EsgProcessor::new(esg.clone());

        let result = processor
            .run(&ctx(vec!["BTC".into(), "ETH".into()], false))
            .await
            .unwrap();

        assert_eq!(result["symbolsUpdated"], 2);
        assert_eq!(esg.refreshed.lock().as_slice(), &["BTC", "ETH"]);
        assert_eq!(*esg.cleared.lock(), 0);
    }

    #[tokio::test]
    async fn test_force_refresh_clears_cache_first() {
        let esg = Arc::new(FakeEsg::default());
        let processor = EsgProcessor::new(esg.clone());

        processor
            .run(&ctx(vec!["BTC".into()], true))
            .await
            .unwrap();

        assert_eq!(*esg.cleared.lock(), 1);
    }
}
