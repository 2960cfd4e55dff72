//! In-process failed job store.

use super::{FailedJob, FailedJobRepository};
use crate::error::QueueResult;
use crate::job::JobId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::HashMap;

/// Failed jobs held in memory.
#[derive(Default)]
pub struct MemoryFailedJobRepository {
    jobs: RwLock<HashMap<JobId, FailedJob>>,
}

impl MemoryFailedJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FailedJobRepository for MemoryFailedJobRepository {
    async fn store(&self, job: FailedJob) -> QueueResult<()> {
        self.jobs.write().insert(job.id, job);
        Ok(())
    }

    async fn all(&self) -> QueueResult<Vec<FailedJob>> {
        let mut jobs: Vec<FailedJob> = self.jobs.read().values().cloned().collect();
        jobs.sort_by_key(|job| (Reverse(job.failed_at), job.id));
        Ok(jobs)
    }

    async fn find(&self, id: &JobId) -> QueueResult<Option<FailedJob>> {
        Ok(self.jobs.read().get(id).cloned())
    }

    async fn delete(&self, id: &JobId) -> QueueResult<bool> {
        Ok(self.jobs.write().remove(id).is_some())
    }

    async fn count(&self) -> QueueResult<u64> {
        Ok(self.jobs.read().len() as u64)
    }

    async fn flush(&self) -> QueueResult<u64> {
        let mut jobs = self.jobs.write();
        let count = jobs.len() as u64;
        jobs.clear();
        Ok(count)
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| job.failed_at >= cutoff);
        Ok((before - jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;
    use crate::queue::QueueName;
    use chrono::Duration;

    fn failed_at(at: DateTime<Utc>) -> FailedJob {
        let job = NewJob::new(QueueName::default(), "noop", "{}").into_queued(at, at);
        FailedJob::from_queued(&job, 1, "boom", at)
    }

    #[tokio::test]
    async fn test_store_find_delete() {
        let repo = MemoryFailedJobRepository::new();
        let job = failed_at(Utc::now());
        let id = job.id;

        repo.store(job.clone()).await.unwrap();
        assert_eq!(repo.find(&id).await.unwrap(), Some(job));
        assert_eq!(repo.count().await.unwrap(), 1);

        assert!(repo.delete(&id).await.unwrap());
        assert!(!repo.delete(&id).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_all_newest_first() {
        let repo = MemoryFailedJobRepository::new();
        let now = Utc::now();
        let old = failed_at(now - Duration::hours(1));
        let new = failed_at(now);
        repo.store(old.clone()).await.unwrap();
        repo.store(new.clone()).await.unwrap();

        let ids: Vec<JobId> = repo.all().await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![new.id, old.id]);
    }

    #[tokio::test]
    async fn test_prune_keeps_boundary() {
        let repo = MemoryFailedJobRepository::new();
        let cutoff = Utc::now();
        repo.store(failed_at(cutoff - Duration::milliseconds(1))).await.unwrap();
        repo.store(failed_at(cutoff)).await.unwrap();

        assert_eq!(repo.prune(cutoff).await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_flush() {
        let repo = MemoryFailedJobRepository::new();
        repo.store(failed_at(Utc::now())).await.unwrap();
        repo.store(failed_at(Utc::now())).await.unwrap();
        assert_eq!(repo.flush().await.unwrap(), 2);
        assert!(repo.all().await.unwrap().is_empty());
    }
}
