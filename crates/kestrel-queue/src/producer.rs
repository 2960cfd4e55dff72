//! Producer-side entry point for enqueueing jobs.

use crate::definition::{encode_payload, JobDefinition};
use crate::error::QueueResult;
use crate::job::{JobId, NewJob};
use crate::metrics::QueueMetrics;
use crate::queue::{PushOptions, QueueDriver, QueueName};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Encodes job payloads and hands them to a driver.
///
/// Queue is chosen from the push options, then the definition, then the
/// configured default. Priority follows the same order, ending at 0.
#[derive(Clone)]
pub struct Dispatcher {
    driver: Arc<dyn QueueDriver>,
    default_queue: QueueName,
}

impl Dispatcher {
    pub fn new(driver: Arc<dyn QueueDriver>, default_queue: QueueName) -> Self {
        Self { driver, default_queue }
    }

    /// Enqueues a job that is available immediately.
    pub async fn push<D: JobDefinition>(
        &self,
        definition: &D,
        payload: &D::Payload,
        options: PushOptions,
    ) -> QueueResult<JobId> {
        let job = self.build(definition, payload, options)?;
        let (queue, priority) = (job.queue.clone(), job.priority);

        let id = self.driver.push(job).await?;
        QueueMetrics::job_pushed(queue.as_str(), D::NAME, priority.value());
        debug!(job_id = %id, job_name = D::NAME, queue = %queue, "Dispatched job");
        Ok(id)
    }

    /// Enqueues a job that becomes available after `delay`.
    pub async fn later<D: JobDefinition>(
        &self,
        definition: &D,
        payload: &D::Payload,
        delay: Duration,
        options: PushOptions,
    ) -> QueueResult<JobId> {
        let job = self.build(definition, payload, options)?;
        let (queue, priority) = (job.queue.clone(), job.priority);

        let id = self.driver.later(job, delay).await?;
        QueueMetrics::job_pushed(queue.as_str(), D::NAME, priority.value());
        debug!(
            job_id = %id,
            job_name = D::NAME,
            queue = %queue,
            delay_ms = delay.as_millis() as u64,
            "Dispatched delayed job"
        );
        Ok(id)
    }

    fn build<D: JobDefinition>(&self, definition: &D, payload: &D::Payload, options: PushOptions) -> QueueResult<NewJob> {
        let queue = options
            .queue
            .or_else(|| definition.queue())
            .unwrap_or_else(|| self.default_queue.clone());
        let priority = options
            .priority
            .or_else(|| definition.priority())
            .unwrap_or_default();

        Ok(NewJob::new(queue, D::NAME, encode_payload::<D>(payload)?).with_priority(priority))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryDriver;
    use crate::job::JobContext;
    use crate::queue::JobPriority;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Report {
        id: u64,
        title: String,
    }

    struct BuildReport;

    #[async_trait]
    impl JobDefinition for BuildReport {
        type Payload = Report;
        type Error = String;
        const NAME: &'static str = "build_report";

        fn queue(&self) -> Option<QueueName> {
            QueueName::new("reports").ok()
        }

        fn priority(&self) -> Option<JobPriority> {
            Some(JobPriority::NORMAL)
        }

        async fn handle(&self, _payload: &Report, _ctx: &JobContext) -> Result<(), String> {
            Ok(())
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<MemoryDriver>) {
        let driver = Arc::new(MemoryDriver::default());
        (Dispatcher::new(driver.clone(), QueueName::default()), driver)
    }

    fn report() -> Report {
        Report {
            id: 7,
            title: "Q3 · ünïcode".into(),
        }
    }

    #[tokio::test]
    async fn test_definition_defaults_apply() {
        let (dispatcher, driver) = dispatcher();
        let id = dispatcher.push(&BuildReport, &report(), PushOptions::new()).await.unwrap();

        let job = driver.get(&id).unwrap();
        assert_eq!(job.queue.as_str(), "reports");
        assert_eq!(job.priority, JobPriority::NORMAL);
        assert_eq!(job.name, "build_report");
    }

    #[tokio::test]
    async fn test_options_override_definition() {
        let (dispatcher, driver) = dispatcher();
        let options = PushOptions::new()
            .on_queue(QueueName::new("urgent").unwrap())
            .priority(JobPriority::HIGHEST);
        let id = dispatcher.push(&BuildReport, &report(), options).await.unwrap();

        let job = driver.get(&id).unwrap();
        assert_eq!(job.queue.as_str(), "urgent");
        assert_eq!(job.priority, JobPriority::HIGHEST);
    }

    #[tokio::test]
    async fn test_payload_roundtrips_exactly() {
        let (dispatcher, driver) = dispatcher();
        let id = dispatcher.push(&BuildReport, &report(), PushOptions::new()).await.unwrap();

        let stored = driver.get(&id).unwrap();
        let decoded: Report = serde_json::from_str(&stored.payload).unwrap();
        assert_eq!(decoded, report());
    }

    #[tokio::test]
    async fn test_later_is_delayed() {
        let (dispatcher, driver) = dispatcher();
        dispatcher
            .later(&BuildReport, &report(), Duration::from_secs(60), PushOptions::new())
            .await
            .unwrap();

        let reports = QueueName::new("reports").unwrap();
        assert_eq!(driver.size(&reports).await.unwrap(), 1);
        assert!(driver.pop(&reports).await.unwrap().is_none());
    }
}
