//! Inspection and retry of failed jobs.

use super::{FailedJob, FailedJobRepository};
use crate::clock::{system_clock, to_chrono, Clock};
use crate::error::{QueueError, QueueResult};
use crate::job::JobId;
use crate::metrics::QueueMetrics;
use crate::queue::QueueDriver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Ties the failed job store to the driver that jobs are retried on.
#[derive(Clone)]
pub struct FailedJobService {
    repository: Arc<dyn FailedJobRepository>,
    driver: Arc<dyn QueueDriver>,
    clock: Arc<dyn Clock>,
}

impl FailedJobService {
    pub fn new(repository: Arc<dyn FailedJobRepository>, driver: Arc<dyn QueueDriver>) -> Self {
        Self {
            repository,
            driver,
            clock: system_clock(),
        }
    }

    /// Replaces the clock used for pruning.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn repository(&self) -> &Arc<dyn FailedJobRepository> {
        &self.repository
    }

    pub async fn store(&self, job: FailedJob) -> QueueResult<()> {
        self.repository.store(job).await
    }

    pub async fn all(&self) -> QueueResult<Vec<FailedJob>> {
        self.repository.all().await
    }

    pub async fn find(&self, id: &JobId) -> QueueResult<Option<FailedJob>> {
        self.repository.find(id).await
    }

    /// Forgets a failed job without retrying it.
    pub async fn delete(&self, id: &JobId) -> QueueResult<()> {
        if self.repository.delete(id).await? {
            Ok(())
        } else {
            Err(QueueError::JobNotFound(id.to_string()))
        }
    }

    pub async fn count(&self) -> QueueResult<u64> {
        self.repository.count().await
    }

    pub async fn flush(&self) -> QueueResult<u64> {
        let flushed = self.repository.flush().await?;
        info!(count = flushed, "Flushed failed jobs");
        Ok(flushed)
    }

    /// Requeues a failed job with its attempt counter reset.
    ///
    /// The job is pushed under its original ID before the record is removed.
    /// Pushing upserts by ID, so if the delete fails the retry can simply be
    /// repeated.
    pub async fn retry(&self, id: &JobId) -> QueueResult<JobId> {
        let failed = self
            .repository
            .find(id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;

        let job_id = self.driver.push(failed.to_new_job()).await?;

        if let Err(e) = self.repository.delete(id).await {
            error!(job_id = %id, error = %e, "Failed job requeued but its record could not be removed");
            return Err(e);
        }

        QueueMetrics::failed_job_retried(failed.queue.as_str(), &failed.name);
        info!(job_id = %job_id, job_name = %failed.name, queue = %failed.queue, "Retried failed job");
        Ok(job_id)
    }

    /// Retries every failed job, returning how many were requeued.
    ///
    /// One failing retry does not stop the rest.
    pub async fn retry_all(&self) -> QueueResult<u64> {
        let mut retried = 0;
        for failed in self.repository.all().await? {
            match self.retry(&failed.id).await {
                Ok(_) => retried += 1,
                Err(e) => {
                    error!(job_id = %failed.id, job_name = %failed.name, error = %e, "Failed to retry job");
                }
            }
        }
        Ok(retried)
    }

    /// Deletes failed jobs older than `older_than`, returning how many.
    pub async fn prune(&self, older_than: Duration) -> QueueResult<u64> {
        let cutoff = self.clock.now() - to_chrono(older_than);
        let pruned = self.repository.prune(cutoff).await?;
        info!(count = pruned, older_than_secs = older_than.as_secs(), "Pruned failed jobs");
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::drivers::MemoryDriver;
    use crate::failed::MemoryFailedJobRepository;
    use crate::job::{JobStatus, NewJob};
    use crate::queue::{JobPriority, QueueName};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    fn failed(at: DateTime<Utc>) -> FailedJob {
        let mut job = NewJob::new(QueueName::new("mail").unwrap(), "send_email", "{}")
            .with_priority(JobPriority::NORMAL)
            .into_queued(at, at);
        job.attempts = 3;
        FailedJob::from_queued(&job, 3, "boom", at)
    }

    fn service() -> (FailedJobService, Arc<MemoryDriver>, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        let driver = Arc::new(MemoryDriver::new(clock.clone(), Duration::from_secs(30)));
        let service = FailedJobService::new(Arc::new(MemoryFailedJobRepository::new()), driver.clone())
            .with_clock(clock.clone());
        (service, driver, clock)
    }

    #[tokio::test]
    async fn test_retry_requeues_with_reset_attempts() {
        let (service, driver, clock) = service();
        let job = failed(clock.now());
        service.store(job.clone()).await.unwrap();

        let id = service.retry(&job.id).await.unwrap();
        assert_eq!(id, job.id);
        assert!(service.all().await.unwrap().is_empty());

        let queued = driver.pop(&job.queue).await.unwrap().unwrap();
        assert_eq!(queued.id, job.id);
        assert_eq!(queued.attempts, 0);
        assert_eq!(queued.priority, JobPriority::NORMAL);
        assert_eq!(queued.status, JobStatus::Reserved);
    }

    #[tokio::test]
    async fn test_retry_unknown() {
        let (service, _, _) = service();
        let result = service.retry(&JobId::new()).await;
        assert!(matches!(result, Err(QueueError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_unknown() {
        let (service, _, _) = service();
        assert!(matches!(service.delete(&JobId::new()).await, Err(QueueError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_retry_all_survives_partial_failure() {
        struct FlakyDriver {
            inner: MemoryDriver,
            reject: JobId,
        }

        #[async_trait]
        impl QueueDriver for FlakyDriver {
            async fn push(&self, job: NewJob) -> QueueResult<JobId> {
                if job.id == self.reject {
                    return Err(QueueError::Connection("refused".into()));
                }
                self.inner.push(job).await
            }
            async fn later(&self, job: NewJob, delay: Duration) -> QueueResult<JobId> {
                self.inner.later(job, delay).await
            }
            async fn pop(&self, queue: &QueueName) -> QueueResult<Option<crate::job::QueuedJob>> {
                self.inner.pop(queue).await
            }
            async fn pop_many(&self, queue: &QueueName, limit: usize) -> QueueResult<Vec<crate::job::QueuedJob>> {
                self.inner.pop_many(queue, limit).await
            }
            async fn mark_processing(&self, id: &JobId, lease: Duration) -> QueueResult<()> {
                self.inner.mark_processing(id, lease).await
            }
            async fn complete(&self, id: &JobId) -> QueueResult<()> {
                self.inner.complete(id).await
            }
            async fn release(&self, id: &JobId, delay: Duration) -> QueueResult<()> {
                self.inner.release(id, delay).await
            }
            async fn delete(&self, id: &JobId) -> QueueResult<()> {
                self.inner.delete(id).await
            }
            async fn size(&self, queue: &QueueName) -> QueueResult<u64> {
                self.inner.size(queue).await
            }
            async fn clear(&self, queue: &QueueName) -> QueueResult<u64> {
                self.inner.clear(queue).await
            }
            async fn queues(&self) -> QueueResult<Vec<QueueName>> {
                self.inner.queues().await
            }
        }

        let now = Utc::now();
        let jobs = [failed(now), failed(now), failed(now)];
        let driver = Arc::new(FlakyDriver {
            inner: MemoryDriver::default(),
            reject: jobs[1].id,
        });
        let service = FailedJobService::new(Arc::new(MemoryFailedJobRepository::new()), driver.clone());
        for job in &jobs {
            service.store(job.clone()).await.unwrap();
        }

        assert_eq!(service.retry_all().await.unwrap(), 2);
        let remaining = service.all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, jobs[1].id);
        assert_eq!(driver.size(&QueueName::new("mail").unwrap()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_prune_uses_clock() {
        let (service, _, clock) = service();
        let start = clock.now();
        service.store(failed(start)).await.unwrap();
        clock.advance(Duration::from_secs(3600));
        let recent = failed(clock.now());
        service.store(recent.clone()).await.unwrap();

        // The first job is exactly one hour old: inside the window.
        assert_eq!(service.prune(Duration::from_secs(3600)).await.unwrap(), 0);

        clock.advance(Duration::from_millis(1));
        assert_eq!(service.prune(Duration::from_secs(3600)).await.unwrap(), 1);
        assert_eq!(service.all().await.unwrap(), vec![recent]);
    }

    #[tokio::test]
    async fn test_flush() {
        let (service, _, clock) = service();
        service.store(failed(clock.now())).await.unwrap();
        assert_eq!(service.flush().await.unwrap(), 1);
        assert_eq!(service.count().await.unwrap(), 0);
    }
}
