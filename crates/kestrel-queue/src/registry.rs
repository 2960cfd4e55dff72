//! Name-keyed registry of job definitions.

use crate::definition::{JobDefinition, Registered, RegisteredJob};
use crate::error::{QueueError, QueueResult};
use crate::job::{JobContext, QueuedJob};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Maps job names to their definitions.
///
/// Filled once at startup, then shared immutably behind an `Arc`.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<&'static str, Arc<dyn RegisteredJob>>,
}

impl JobRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition under its name.
    pub fn register<D: JobDefinition>(&mut self, definition: D) -> QueueResult<()> {
        if self.jobs.contains_key(D::NAME) {
            return Err(QueueError::Configuration(format!(
                "Job already registered: {}",
                D::NAME
            )));
        }

        self.jobs.insert(D::NAME, Arc::new(Registered(definition)));
        info!(job_name = D::NAME, "Registered job definition");
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<D: JobDefinition>(mut self, definition: D) -> QueueResult<Self> {
        self.register(definition)?;
        Ok(self)
    }

    /// Looks up a definition by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn RegisteredJob>> {
        self.jobs.get(name).cloned()
    }

    /// Looks up a definition, failing if it is absent.
    pub fn resolve(&self, name: &str) -> QueueResult<Arc<dyn RegisteredJob>> {
        self.get(name)
            .ok_or_else(|| QueueError::HandlerNotFound(name.to_string()))
    }

    /// Runs the definition registered for a queued job.
    pub async fn dispatch(&self, job: &QueuedJob, ctx: &JobContext) -> QueueResult<()> {
        let definition = self.resolve(&job.name)?;
        definition.execute(&job.payload, ctx).await
    }

    /// Returns true if a definition is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.jobs.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.names())
            .finish()
    }
}
