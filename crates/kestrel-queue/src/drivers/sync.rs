//! Driver that runs jobs inline instead of storing them.
//!
//! Meant for tests and local development. Nothing is ever stored, so there is
//! nothing to pop, count or reclaim.

use crate::clock::{system_clock, Clock};
use crate::definition::{execute_with_timeout, JobDefaults};
use crate::error::{QueueError, QueueResult};
use crate::job::{JobId, NewJob, QueuedJob};
use crate::queue::{QueueDriver, QueueName};
use crate::registry::JobRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

const SYNC_WORKER_ID: &str = "sync";

/// Executes each pushed job once, on the caller's task.
pub struct SyncDriver {
    registry: Arc<JobRegistry>,
    defaults: JobDefaults,
    clock: Arc<dyn Clock>,
}

impl SyncDriver {
    /// Creates a sync driver over a registry.
    pub fn new(registry: Arc<JobRegistry>, defaults: JobDefaults) -> Self {
        Self {
            registry,
            defaults,
            clock: system_clock(),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn run(&self, job: NewJob) -> QueueResult<JobId> {
        let definition = self.registry.resolve(&job.name)?;
        let settings = definition.overrides().resolve(&self.defaults);

        let now = self.clock.now();
        let queued = job.into_queued(now, now);
        let ctx = queued.to_context(settings.max_attempts, SYNC_WORKER_ID, now);

        debug!(job_id = %queued.id, job_name = %queued.name, "Running job inline");

        match execute_with_timeout(definition.as_ref(), &queued.payload, &ctx, settings.timeout).await {
            Ok(()) => Ok(queued.id),
            Err(e) => {
                error!(job_id = %queued.id, job_name = %queued.name, error = %e, "Inline job failed");
                definition.failed(&queued.payload, &ctx, &e).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl QueueDriver for SyncDriver {
    async fn push(&self, job: NewJob) -> QueueResult<JobId> {
        self.run(job).await
    }

    async fn later(&self, job: NewJob, delay: Duration) -> QueueResult<JobId> {
        if !delay.is_zero() {
            warn!(job_name = %job.name, delay_ms = delay.as_millis() as u64, "Sync driver ignores delays");
        }
        self.run(job).await
    }

    async fn pop(&self, _queue: &QueueName) -> QueueResult<Option<QueuedJob>> {
        Ok(None)
    }

    async fn pop_many(&self, _queue: &QueueName, _limit: usize) -> QueueResult<Vec<QueuedJob>> {
        Ok(Vec::new())
    }

    async fn mark_processing(&self, id: &JobId, _lease: Duration) -> QueueResult<()> {
        Err(QueueError::JobNotFound(id.to_string()))
    }

    async fn complete(&self, id: &JobId) -> QueueResult<()> {
        Err(QueueError::JobNotFound(id.to_string()))
    }

    async fn release(&self, id: &JobId, _delay: Duration) -> QueueResult<()> {
        Err(QueueError::JobNotFound(id.to_string()))
    }

    async fn delete(&self, id: &JobId) -> QueueResult<()> {
        Err(QueueError::JobNotFound(id.to_string()))
    }

    async fn size(&self, _queue: &QueueName) -> QueueResult<u64> {
        Ok(0)
    }

    async fn clear(&self, _queue: &QueueName) -> QueueResult<u64> {
        Ok(0)
    }

    async fn queues(&self) -> QueueResult<Vec<QueueName>> {
        Ok(Vec::new())
    }
}
