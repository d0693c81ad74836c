//! Templated email delivery processor.

use super::payload_mismatch;
use crate::error::JobError;
use crate::job::{JobContext, JobKind, JobPayload};
use crate::worker::Processor;
use async_trait::async_trait;
use fiscus_core::domain::{EmailAttachment, EmailGateway};
use std::sync::Arc;
use tracing::debug;

/// Delivers a templated email. Priority mapping happens at enqueue, not
/// here.
pub struct EmailProcessor {
    gateway: Arc<dyn EmailGateway>,
}

impl EmailProcessor {
    pub fn new(gateway: Arc<dyn EmailGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Processor for EmailProcessor {
    fn kind(&self) -> JobKind {
        JobKind::SendEmail
    }

    async fn run(&self, ctx: &JobContext) -> Result<serde_json::Value, JobError> {
        let JobPayload::SendEmail {
            to, template, data, ..
        } = &ctx.payload
        else {
            return Err(payload_mismatch(self.kind(), ctx.payload.kind()));
        };

        let attachments: Vec<EmailAttachment> = data
            .get("attachments")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        self.gateway
            .deliver(to, template, data, &attachments)
            .await?;

        debug!(to = %to, template = %template, "Email delivered");
        Ok(serde_json::json!({ "delivered": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use fiscus_core::CoreResult;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeGateway {
        sent: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl EmailGateway for FakeGateway {
        async fn deliver(
            &self,
            to: &str,
            template: &str,
            _data: &serde_json::Value,
            attachments: &[EmailAttachment],
        ) -> CoreResult<()> {
            self.sent
                .lock()
                .push((to.to_string(), template.to_string(), attachments.len()));
            Ok(())
        }
    }

    fn ctx(data: serde_json::Value) -> JobContext {
        JobContext {
            job_id: JobId::from("email-1"),
            queue: "email-notifications".into(),
            attempt: 1,
            max_attempts: 5,
            user_id: None,
            payload: JobPayload::SendEmail {
                to: "user@example.com".into(),
                template: "weekly-report".into(),
                data,
                priority: None,
            },
        }
    }

    #[tokio::test]
    async fn test_delivers_with_parsed_attachments() {
        let gateway = Arc::new(FakeGateway::default());
        let processor = EmailProcessor::new(gateway.clone());

        let attachment = EmailAttachment::from_bytes("report.pdf", "application/pdf", b"pdf!");
        let data = serde_json::json!({ "attachments": [attachment] });

        processor.run(&ctx(data)).await.unwrap();

        let sent = gateway.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "user@example.com");
        assert_eq!(sent[0].1, "weekly-report");
        assert_eq!(sent[0].2, 1);
    }

    #[tokio::test]
    async fn test_delivers_without_attachments() {
        let gateway = Arc::new(FakeGateway::default());
        let processor = EmailProcessor::new(gateway.clone());

        processor
            .run(&ctx(serde_json::json!({ "name": "Ada" })))
            .await
            .unwrap();

        assert_eq!(gateway.sent.lock()[0].2, 0);
    }
}
