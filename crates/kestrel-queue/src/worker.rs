//! Worker loop and worker pool.

use crate::clock::{system_clock, Clock};
use crate::config::QueueConfig;
use crate::definition::{execute_with_timeout, JobDefaults, RegisteredJob};
use crate::error::{QueueError, QueueResult};
use crate::failed::{FailedJob, FailedJobRepository};
use crate::job::{JobContext, QueuedJob};
use crate::metrics::QueueMetrics;
use crate::queue::{QueueDriver, QueueName};
use crate::registry::JobRegistry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// What happened to a popped job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Handler succeeded; the job was removed.
    Completed,
    /// Attempt failed; the job will be retried after `delay`.
    Released { delay: Duration },
    /// The job was moved to the failed job store.
    Buried,
}

#[derive(Debug, Default)]
struct WorkerCounters {
    completed: AtomicU64,
    released: AtomicU64,
    buried: AtomicU64,
}

impl WorkerCounters {
    fn snapshot(&self) -> [u64; 3] {
        [
            self.completed.load(Ordering::Relaxed),
            self.released.load(Ordering::Relaxed),
            self.buried.load(Ordering::Relaxed),
        ]
    }
}

/// Polls a driver and runs jobs through their definitions.
///
/// All collaborators are passed in; a worker holds no global state.
pub struct Worker {
    id: String,
    driver: Arc<dyn QueueDriver>,
    registry: Arc<JobRegistry>,
    failed: Arc<dyn FailedJobRepository>,
    clock: Arc<dyn Clock>,
    defaults: JobDefaults,
    queues: Vec<QueueName>,
    poll_interval: Duration,
    reservation_grace: Duration,
    counters: WorkerCounters,
}

impl Worker {
    /// Creates a worker for the queues listed in `config.worker`.
    pub fn new(
        driver: Arc<dyn QueueDriver>,
        registry: Arc<JobRegistry>,
        failed: Arc<dyn FailedJobRepository>,
        config: &QueueConfig,
    ) -> QueueResult<Self> {
        config.check()?;

        Ok(Self {
            id: format!("worker-{}", Uuid::new_v4()),
            driver,
            registry,
            failed,
            clock: system_clock(),
            defaults: JobDefaults::from_config(config)?,
            queues: config.worker.queue_names()?,
            poll_interval: config.poll_interval(),
            reservation_grace: config.reservation_grace(),
            counters: WorkerCounters::default(),
        })
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the generated worker ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replaces the queues to poll, in priority order.
    pub fn with_queues(mut self, queues: Vec<QueueName>) -> Self {
        self.queues = queues;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queues(&self) -> &[QueueName] {
        &self.queues
    }

    /// Pops and processes at most one job, trying queues in order.
    ///
    /// Returns `None` when every queue is empty.
    pub async fn run_once(&self) -> QueueResult<Option<JobOutcome>> {
        match self.next_job().await? {
            Some(job) => self.process(job).await.map(Some),
            None => Ok(None),
        }
    }

    async fn next_job(&self) -> QueueResult<Option<QueuedJob>> {
        for queue in &self.queues {
            if let Some(job) = self.driver.pop(queue).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Runs until `shutdown` flips to true.
    ///
    /// The flag is checked between jobs, so a running handler is never
    /// cancelled here; it ends on its own or at its timeout.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.id, queues = ?self.queues, "Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Job-level errors are logged inside the job span.
            let idle = match self.next_job().await {
                Ok(Some(job)) => self.process(job).await.is_err(),
                Ok(None) => true,
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to poll queues");
                    true
                }
            };

            if idle {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    async fn process(&self, job: QueuedJob) -> QueueResult<JobOutcome> {
        QueueMetrics::job_popped(job.queue.as_str(), &job.name);

        let span = info_span!(
            "job",
            job_id = %job.id,
            job_name = %job.name,
            queue = %job.queue,
            attempt = job.attempts + 1,
            worker_id = %self.id,
        );

        async {
            let result = self.settle(&job).await;
            if let Err(e) = &result {
                error!(error = %e, "Failed to settle job; it stays leased until reclaimed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn settle(&self, job: &QueuedJob) -> QueueResult<JobOutcome> {
        debug!("Processing job");

        let Some(definition) = self.registry.get(&job.name) else {
            let ctx = job.to_context(self.defaults.max_attempts, &self.id, self.clock.now());
            let error = QueueError::HandlerNotFound(job.name.clone());
            return self.bury(job, None, &ctx, error, job.attempts).await;
        };

        let settings = definition.overrides().resolve(&self.defaults);
        let ctx = job.to_context(settings.max_attempts, &self.id, self.clock.now());

        if job.attempts >= settings.max_attempts {
            let error = QueueError::MaxAttemptsExceeded {
                job_id: job.id.to_string(),
                attempts: job.attempts,
            };
            return self.bury(job, Some(definition.as_ref()), &ctx, error, job.attempts).await;
        }

        self.driver
            .mark_processing(&job.id, settings.timeout + self.reservation_grace)
            .await?;

        let started = Instant::now();
        let result = execute_with_timeout(definition.as_ref(), &job.payload, &ctx, settings.timeout).await;
        let elapsed = started.elapsed();

        let error = match result {
            Ok(()) => {
                self.driver.complete(&job.id).await?;
                QueueMetrics::job_completed(job.queue.as_str(), &job.name, elapsed);
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(duration_ms = elapsed.as_millis() as u64, "Job completed");
                return Ok(JobOutcome::Completed);
            }
            Err(e) => e,
        };

        if matches!(error, QueueError::Timeout { .. }) {
            QueueMetrics::job_timed_out(job.queue.as_str(), &job.name);
        }

        let attempts = job.attempts + 1;
        if error.is_fatal() || attempts >= settings.max_attempts {
            return self.bury(job, Some(definition.as_ref()), &ctx, error, attempts).await;
        }

        let delay = settings.backoff.next_delay(attempts);
        self.driver.release(&job.id, delay).await?;
        QueueMetrics::job_released(job.queue.as_str(), &job.name, elapsed);
        self.counters.released.fetch_add(1, Ordering::Relaxed);
        warn!(
            error = %error,
            delay_ms = delay.as_millis() as u64,
            remaining = settings.max_attempts - attempts,
            "Job failed, released for retry"
        );

        Ok(JobOutcome::Released { delay })
    }

    /// Archives the job, runs its failure hook, then drops it from the driver.
    ///
    /// If archiving fails the job stays reserved and is reclaimed later. A
    /// record written after the job was enqueued means an earlier pass buried
    /// it and then failed to delete it, so only the delete is repeated.
    async fn bury(
        &self,
        job: &QueuedJob,
        definition: Option<&dyn RegisteredJob>,
        ctx: &JobContext,
        error: QueueError,
        attempts: u32,
    ) -> QueueResult<JobOutcome> {
        let archived = self
            .failed
            .find(&job.id)
            .await?
            .filter(|record| record.failed_at.timestamp_millis() >= job.created_at.timestamp_millis());

        if let Some(archived) = archived {
            warn!(exception = %archived.exception, "Job already archived, removing it from the queue");
        } else {
            let record = FailedJob::from_queued(job, attempts, &error, self.clock.now());
            self.failed.store(record).await?;

            if let Some(definition) = definition {
                definition.failed(&job.payload, ctx, &error).await;
            }
        }

        self.driver.delete(&job.id).await?;

        let reason = match &error {
            QueueError::HandlerNotFound(_) => "handler_not_found",
            QueueError::MaxAttemptsExceeded { .. } => "lease_expired",
            QueueError::Validation { .. } => "invalid_payload",
            QueueError::Timeout { .. } => "timeout",
            _ => "attempts_exhausted",
        };
        QueueMetrics::job_buried(job.queue.as_str(), &job.name, reason);
        self.counters.buried.fetch_add(1, Ordering::Relaxed);
        error!(error = %error, attempts, reason, "Job buried");

        Ok(JobOutcome::Buried)
    }
}

/// Worker pool statistics.
#[derive(Debug, Clone)]
pub struct WorkerPoolStats {
    /// Pool ID.
    pub id: String,

    /// Is running.
    pub running: bool,

    /// Configured concurrency.
    pub concurrency: usize,

    /// Jobs completed.
    pub completed: u64,

    /// Failed attempts released for retry.
    pub released: u64,

    /// Jobs buried.
    pub buried: u64,

    /// Queues being processed.
    pub queues: Vec<QueueName>,
}

/// Runs several workers against one driver.
pub struct WorkerPool {
    id: String,
    workers: Vec<Arc<Worker>>,
    queues: Vec<QueueName>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_timeout: Duration,
    running: AtomicBool,
}

impl WorkerPool {
    /// Builds `config.worker.concurrency` workers.
    pub fn new(
        driver: Arc<dyn QueueDriver>,
        registry: Arc<JobRegistry>,
        failed: Arc<dyn FailedJobRepository>,
        config: &QueueConfig,
    ) -> QueueResult<Self> {
        Self::with_clock(driver, registry, failed, config, system_clock())
    }

    /// Like [`new`](Self::new) with an explicit clock.
    pub fn with_clock(
        driver: Arc<dyn QueueDriver>,
        registry: Arc<JobRegistry>,
        failed: Arc<dyn FailedJobRepository>,
        config: &QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> QueueResult<Self> {
        let id = format!("worker-pool-{}", Uuid::new_v4());
        let workers = (0..config.worker.concurrency)
            .map(|n| {
                Worker::new(driver.clone(), registry.clone(), failed.clone(), config).map(|worker| {
                    Arc::new(
                        worker
                            .with_clock(clock.clone())
                            .with_id(format!("{}-{}", id, n)),
                    )
                })
            })
            .collect::<QueueResult<Vec<_>>>()?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            id,
            workers,
            queues: config.worker.queue_names()?,
            shutdown_tx,
            shutdown_timeout: config.worker.shutdown_timeout(),
            running: AtomicBool::new(false),
        })
    }

    /// Runs every worker until [`stop`](Self::stop) is called.
    ///
    /// After the stop signal, workers get `shutdown_timeout` to finish their
    /// current job. Tasks still running after that are aborted and their jobs
    /// stay reserved until the lease expires.
    pub async fn run(&self) -> QueueResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::Internal("Worker pool already running".to_string()));
        }

        info!(
            pool_id = %self.id,
            concurrency = self.workers.len(),
            queues = ?self.queues,
            "Starting worker pool"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tasks = JoinSet::new();
        for worker in &self.workers {
            let worker = worker.clone();
            let rx = self.shutdown_tx.subscribe();
            tasks.spawn(async move { worker.run(rx).await });
        }

        let _ = shutdown_rx.wait_for(|stopped| *stopped).await;

        info!(pool_id = %self.id, "Waiting for workers to finish...");
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                pool_id = %self.id,
                remaining = tasks.len(),
                "Shutdown timeout reached, aborting workers"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        self.running.store(false, Ordering::SeqCst);

        let stats = self.stats();
        info!(
            pool_id = %self.id,
            completed = stats.completed,
            released = stats.released,
            buried = stats.buried,
            "Worker pool stopped"
        );

        Ok(())
    }

    /// Signals every worker to stop polling.
    pub fn stop(&self) {
        info!(pool_id = %self.id, "Stopping worker pool...");
        self.shutdown_tx.send_replace(true);
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the pool ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        let [completed, released, buried] = self.workers.iter().fold([0u64; 3], |acc, w| {
            let s = w.counters.snapshot();
            [acc[0] + s[0], acc[1] + s[1], acc[2] + s[2]]
        });

        WorkerPoolStats {
            id: self.id.clone(),
            running: self.is_running(),
            concurrency: self.workers.len(),
            completed,
            released,
            buried,
            queues: self.queues.clone(),
        }
    }
}
