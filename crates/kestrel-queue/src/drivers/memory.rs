//! In-process queue driver.

use crate::clock::{system_clock, to_chrono, Clock};
use crate::error::{QueueError, QueueResult};
use crate::job::{JobId, JobStatus, NewJob, QueuedJob};
use crate::queue::{QueueDriver, QueueName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

struct Entry {
    job: QueuedJob,
    seq: u64,
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobId, Entry>,
    queues: BTreeSet<QueueName>,
    next_seq: u64,
}

impl MemoryState {
    fn insert(&mut self, job: QueuedJob) -> JobId {
        let id = job.id;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queues.insert(job.queue.clone());
        self.jobs.insert(id, Entry { job, seq });
        id
    }

    fn entry_mut(&mut self, id: &JobId) -> QueueResult<&mut Entry> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }

    /// Returns the entry only while it is leased, and, given `now`, only
    /// while the lease has not run out.
    fn leased_mut(&mut self, id: &JobId, now: Option<DateTime<Utc>>) -> QueueResult<&mut Entry> {
        let entry = self.entry_mut(id)?;
        let held = match now {
            Some(now) => entry.job.status.is_leased() && !entry.job.lease_expired(now),
            None => entry.job.status.is_leased(),
        };
        if !held {
            return Err(QueueError::LeaseLost(id.to_string()));
        }
        Ok(entry)
    }
}

/// Queue driver holding jobs in a mutex-guarded map.
///
/// Jobs are lost when the process exits. Several workers in the same process
/// may share one instance.
pub struct MemoryDriver {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
    reservation_timeout: Duration,
}

impl MemoryDriver {
    /// Creates a driver using the given clock and lease length.
    pub fn new(clock: Arc<dyn Clock>, reservation_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
            reservation_timeout,
        }
    }

    /// Returns a copy of a stored job.
    pub fn get(&self, id: &JobId) -> Option<QueuedJob> {
        self.state.lock().jobs.get(id).map(|entry| entry.job.clone())
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new(system_clock(), Duration::from_secs(90))
    }
}

#[async_trait]
impl QueueDriver for MemoryDriver {
    async fn push(&self, job: NewJob) -> QueueResult<JobId> {
        let now = self.clock.now();
        let id = self.state.lock().insert(job.into_queued(now, now));
        debug!(job_id = %id, "Job pushed");
        Ok(id)
    }

    async fn later(&self, job: NewJob, delay: Duration) -> QueueResult<JobId> {
        let now = self.clock.now();
        let available_at = now + to_chrono(delay);
        let id = self.state.lock().insert(job.into_queued(available_at, now));
        debug!(job_id = %id, delay_ms = delay.as_millis() as u64, "Job pushed with delay");
        Ok(id)
    }

    async fn pop(&self, queue: &QueueName) -> QueueResult<Option<QueuedJob>> {
        Ok(self.pop_many(queue, 1).await?.into_iter().next())
    }

    async fn pop_many(&self, queue: &QueueName, limit: usize) -> QueueResult<Vec<QueuedJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let reserved_until = now + to_chrono(self.reservation_timeout);
        let mut state = self.state.lock();

        let mut eligible: Vec<(Reverse<_>, u64, JobId)> = state
            .jobs
            .values()
            .filter(|entry| &entry.job.queue == queue && entry.job.is_available(now))
            .map(|entry| (Reverse(entry.job.priority), entry.seq, entry.job.id))
            .collect();
        eligible.sort_unstable();
        eligible.truncate(limit);

        let mut popped = Vec::with_capacity(eligible.len());
        for (_, _, id) in eligible {
            let entry = state.entry_mut(&id)?;
            if entry.job.lease_expired(now) {
                entry.job.attempts += 1;
                debug!(job_id = %id, attempts = entry.job.attempts, "Reclaimed expired reservation");
            }
            entry.job.status = JobStatus::Reserved;
            entry.job.reserved_until = Some(reserved_until);
            popped.push(entry.job.clone());
        }

        Ok(popped)
    }

    async fn mark_processing(&self, id: &JobId, lease: Duration) -> QueueResult<()> {
        let until = self.clock.now() + to_chrono(lease);
        let mut state = self.state.lock();
        let entry = state.leased_mut(id, None)?;

        entry.job.status = JobStatus::Processing;
        entry.job.reserved_until = Some(until);
        Ok(())
    }

    async fn complete(&self, id: &JobId) -> QueueResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.leased_mut(id, Some(now))?;
        state.jobs.remove(id);
        Ok(())
    }

    async fn release(&self, id: &JobId, delay: Duration) -> QueueResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let entry = state.leased_mut(id, Some(now))?;

        entry.job.attempts += 1;
        entry.job.status = JobStatus::Pending;
        entry.job.available_at = now + to_chrono(delay);
        entry.job.reserved_until = None;
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.leased_mut(id, None)?;
        state.jobs.remove(id);
        Ok(())
    }

    async fn size(&self, queue: &QueueName) -> QueueResult<u64> {
        let state = self.state.lock();
        Ok(state.jobs.values().filter(|entry| &entry.job.queue == queue).count() as u64)
    }

    async fn clear(&self, queue: &QueueName) -> QueueResult<u64> {
        let mut state = self.state.lock();
        if !state.queues.contains(queue) {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        }

        let before = state.jobs.len();
        state.jobs.retain(|_, entry| &entry.job.queue != queue);
        Ok((before - state.jobs.len()) as u64)
    }

    async fn queues(&self) -> QueueResult<Vec<QueueName>> {
        Ok(self.state.lock().queues.iter().cloned().collect())
    }
}
