//! Job definitions bundled with the worker binary.

use async_trait::async_trait;
use kestrel_queue::{JobContext, JobDefinition, JobRegistry, QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Payload for [`LogMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,

    /// Fail this many attempts before succeeding, for exercising retries.
    #[serde(default)]
    pub fail_times: u32,
}

/// Writes its message to the log.
pub struct LogMessage;

#[async_trait]
impl JobDefinition for LogMessage {
    type Payload = Message;
    type Error = String;
    const NAME: &'static str = "log_message";

    fn retry_after(&self) -> Option<Duration> {
        Some(Duration::from_secs(5))
    }

    async fn handle(&self, message: &Message, ctx: &JobContext) -> Result<(), String> {
        if ctx.attempt <= message.fail_times {
            return Err(format!("planned failure {} of {}", ctx.attempt, message.fail_times));
        }

        info!(job_id = %ctx.job_id, attempt = ctx.attempt, text = %message.text, "Message received");
        Ok(())
    }

    async fn on_failure(
        &self,
        message: &Message,
        ctx: &JobContext,
        error: &QueueError,
    ) -> Result<(), String> {
        warn!(job_id = %ctx.job_id, text = %message.text, error = %error, "Message dropped");
        Ok(())
    }
}

/// Builds the registry of every job this binary can run.
pub fn registry() -> QueueResult<JobRegistry> {
    JobRegistry::new().with(LogMessage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_queue::{Clock, JobId, QueueName, SystemClock};

    fn ctx(attempt: u32) -> JobContext {
        JobContext {
            job_id: JobId::new(),
            job_name: LogMessage::NAME.to_string(),
            queue: QueueName::default(),
            attempt,
            max_attempts: 3,
            worker_id: "test".into(),
            started_at: SystemClock.now(),
        }
    }

    #[test]
    fn test_registry_contains_log_message() {
        let registry = registry().unwrap();
        assert!(registry.contains("log_message"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_planned_failures_then_success() {
        let message = Message {
            text: "hello".into(),
            fail_times: 1,
        };
        assert!(LogMessage.handle(&message, &ctx(1)).await.is_err());
        assert!(LogMessage.handle(&message, &ctx(2)).await.is_ok());
    }

    #[test]
    fn test_fail_times_defaults_to_zero() {
        let message: Message = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(message.fail_times, 0);
    }
}
