//! The job definition contract.
//!
//! A definition describes what a job does; the worker decides when and how
//! often it runs. Definitions are registered once in a
//! [`JobRegistry`](crate::registry::JobRegistry) and looked up by name.

use crate::backoff::{Backoff, FixedBackoff};
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::JobContext;
use crate::queue::{JobPriority, QueueName};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A named unit of work.
///
/// # Example
///
/// ```rust,ignore
/// use kestrel_queue::prelude::*;
///
/// struct SendEmail;
///
/// #[derive(Serialize, Deserialize)]
/// struct Email { to: String, subject: String }
///
/// #[async_trait::async_trait]
/// impl JobDefinition for SendEmail {
///     type Payload = Email;
///     type Error = std::io::Error;
///     const NAME: &'static str = "send_email";
///
///     async fn handle(&self, email: &Email, _ctx: &JobContext) -> Result<(), Self::Error> {
///         println!("Sending email to {}", email.to);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait JobDefinition: Send + Sync + 'static {
    /// Payload carried by each job.
    type Payload: Serialize + DeserializeOwned + Send + Sync;

    /// Error returned by the handler and hooks.
    type Error: fmt::Display + Send + Sync + 'static;

    /// Registry key; must be unique per process.
    const NAME: &'static str;

    /// Queue override.
    fn queue(&self) -> Option<QueueName> {
        None
    }

    /// Priority override.
    fn priority(&self) -> Option<JobPriority> {
        None
    }

    /// Attempts before the job is buried.
    fn max_attempts(&self) -> Option<u32> {
        None
    }

    /// Bound on before/handle/after as one unit.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Fixed retry delay, used when no backoff is given.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Backoff strategy; takes precedence over `retry_after`.
    fn backoff(&self) -> Option<Arc<dyn Backoff>> {
        None
    }

    /// Runs the job.
    async fn handle(&self, payload: &Self::Payload, ctx: &JobContext) -> Result<(), Self::Error>;

    /// Runs before `handle`. A failure counts as a failed attempt.
    async fn before_handle(&self, _payload: &Self::Payload, _ctx: &JobContext) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Runs after a successful `handle`. A failure counts as a failed attempt.
    async fn after_handle(&self, _payload: &Self::Payload, _ctx: &JobContext) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Runs once when the job is buried. Errors are logged and dropped.
    async fn on_failure(
        &self,
        _payload: &Self::Payload,
        _ctx: &JobContext,
        _error: &QueueError,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Per-definition overrides, before defaults are applied.
#[derive(Debug, Clone, Default)]
pub struct JobOverrides {
    pub queue: Option<QueueName>,
    pub priority: Option<JobPriority>,
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
    pub retry_after: Option<Duration>,
    pub backoff: Option<Arc<dyn Backoff>>,
}

impl JobOverrides {
    /// Fills every unset field from the defaults.
    pub fn resolve(self, defaults: &JobDefaults) -> JobSettings {
        let backoff = match (self.backoff, self.retry_after) {
            (Some(backoff), _) => backoff,
            (None, Some(delay)) => Arc::new(FixedBackoff::new(delay)),
            (None, None) => defaults.backoff.clone(),
        };

        JobSettings {
            queue: self.queue.unwrap_or_else(|| defaults.queue.clone()),
            priority: self.priority.unwrap_or_default(),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            backoff,
        }
    }
}

/// Process-wide defaults taken from [`QueueConfig`].
#[derive(Debug, Clone)]
pub struct JobDefaults {
    pub queue: QueueName,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff: Arc<dyn Backoff>,
}

impl JobDefaults {
    /// Builds the defaults once from configuration.
    pub fn from_config(config: &QueueConfig) -> QueueResult<Self> {
        Ok(Self {
            queue: config.default_queue_name()?,
            max_attempts: config.max_attempts.max(1),
            timeout: config.timeout(),
            backoff: config.backoff.build(),
        })
    }
}

/// Effective settings for one job definition.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub queue: QueueName,
    pub priority: JobPriority,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff: Arc<dyn Backoff>,
}

/// Object-safe view of a definition, with the payload type erased.
#[async_trait]
pub trait RegisteredJob: Send + Sync {
    /// Registry key.
    fn name(&self) -> &'static str;

    /// Overrides declared by the definition.
    fn overrides(&self) -> JobOverrides;

    /// Decodes the payload and runs before/handle/after.
    async fn execute(&self, payload: &str, ctx: &JobContext) -> QueueResult<()>;

    /// Runs the failure hook, swallowing its error.
    async fn failed(&self, payload: &str, ctx: &JobContext, error: &QueueError);
}

pub(crate) struct Registered<D>(pub(crate) D);

impl<D: JobDefinition> Registered<D> {
    fn decode(&self, payload: &str) -> QueueResult<D::Payload> {
        serde_json::from_str(payload).map_err(|e| QueueError::Validation {
            job: D::NAME.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl<D: JobDefinition> RegisteredJob for Registered<D> {
    fn name(&self) -> &'static str {
        D::NAME
    }

    fn overrides(&self) -> JobOverrides {
        JobOverrides {
            queue: self.0.queue(),
            priority: self.0.priority(),
            max_attempts: self.0.max_attempts(),
            timeout: self.0.timeout(),
            retry_after: self.0.retry_after(),
            backoff: self.0.backoff(),
        }
    }

    async fn execute(&self, payload: &str, ctx: &JobContext) -> QueueResult<()> {
        let payload = self.decode(payload)?;
        let def = &self.0;

        def.before_handle(&payload, ctx)
            .await
            .map_err(|e| QueueError::execution(D::NAME, e))?;
        def.handle(&payload, ctx)
            .await
            .map_err(|e| QueueError::execution(D::NAME, e))?;
        def.after_handle(&payload, ctx)
            .await
            .map_err(|e| QueueError::execution(D::NAME, e))?;

        Ok(())
    }

    async fn failed(&self, payload: &str, ctx: &JobContext, error: &QueueError) {
        let payload = match self.decode(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(job_id = %ctx.job_id, job_name = D::NAME, error = %e, "Skipping on_failure: payload does not decode");
                return;
            }
        };

        if let Err(e) = self.0.on_failure(&payload, ctx, error).await {
            tracing::error!(job_id = %ctx.job_id, job_name = D::NAME, error = %e, "on_failure hook failed");
        }
    }
}

/// Runs a job bounded by `timeout`.
pub(crate) async fn execute_with_timeout(
    job: &dyn RegisteredJob,
    payload: &str,
    ctx: &JobContext,
    timeout: Duration,
) -> QueueResult<()> {
    match tokio::time::timeout(timeout, job.execute(payload, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(QueueError::Timeout {
            job: job.name().to_string(),
            timeout_ms: timeout.as_millis().min(u64::MAX as u128) as u64,
        }),
    }
}

/// Encodes a payload for storage.
pub fn encode_payload<D: JobDefinition>(payload: &D::Payload) -> QueueResult<String> {
    Ok(serde_json::to_string(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use chrono::Utc;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Serialize, Deserialize)]
    struct Greeting {
        name: String,
    }

    #[derive(Default)]
    struct Greet {
        calls: Arc<AtomicU32>,
        fail_after: bool,
        failures: Arc<AtomicU32>,
    }

    #[async_trait]
    impl JobDefinition for Greet {
        type Payload = Greeting;
        type Error = String;
        const NAME: &'static str = "greet";

        fn retry_after(&self) -> Option<Duration> {
            Some(Duration::from_secs(7))
        }

        async fn handle(&self, payload: &Greeting, _ctx: &JobContext) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if payload.name.is_empty() {
                return Err("nobody to greet".to_string());
            }
            Ok(())
        }

        async fn after_handle(&self, _payload: &Greeting, _ctx: &JobContext) -> Result<(), String> {
            if self.fail_after {
                Err("after hook broke".to_string())
            } else {
                Ok(())
            }
        }

        async fn on_failure(&self, _payload: &Greeting, _ctx: &JobContext, _error: &QueueError) -> Result<(), String> {
            self.failures.fetch_add(1, Ordering::SeqCst);
            Err("alerting is down".to_string())
        }
    }

    fn ctx() -> JobContext {
        JobContext {
            job_id: JobId::new(),
            job_name: "greet".into(),
            queue: QueueName::default(),
            attempt: 1,
            max_attempts: 3,
            worker_id: "test".into(),
            started_at: Utc::now(),
        }
    }

    fn defaults() -> JobDefaults {
        JobDefaults::from_config(&QueueConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_execute_runs_handler() {
        let greet = Greet::default();
        let calls = greet.calls.clone();
        let job = Registered(greet);

        job.execute(r#"{"name":"ada"}"#, &ctx()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_is_execution() {
        let job = Registered(Greet::default());
        let err = job.execute(r#"{"name":""}"#, &ctx()).await.unwrap_err();
        assert!(matches!(err, QueueError::Execution { .. }));
        assert!(err.to_string().contains("nobody to greet"));
    }

    #[tokio::test]
    async fn test_after_hook_failure_counts_as_failure() {
        let job = Registered(Greet {
            fail_after: true,
            ..Default::default()
        });
        let err = job.execute(r#"{"name":"ada"}"#, &ctx()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_bad_payload_is_validation() {
        let greet = Greet::default();
        let calls = greet.calls.clone();
        let job = Registered(greet);

        let err = job.execute(r#"{"nom":1}"#, &ctx()).await.unwrap_err();
        assert!(matches!(err, QueueError::Validation { .. }));
        assert!(err.is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_hook_error_is_swallowed() {
        let greet = Greet::default();
        let failures = greet.failures.clone();
        let job = Registered(greet);

        let error = QueueError::execution("greet", "boom");
        job.failed(r#"{"name":"ada"}"#, &ctx(), &error).await;
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_after_becomes_fixed_backoff() {
        let settings = Registered(Greet::default()).overrides().resolve(&defaults());
        assert_eq!(settings.backoff.next_delay(1), Duration::from_secs(7));
        assert_eq!(settings.backoff.next_delay(4), Duration::from_secs(7));
    }

    #[test]
    fn test_defaults_fill_unset_fields() {
        let settings = JobOverrides::default().resolve(&defaults());
        assert_eq!(settings.queue.as_str(), "default");
        assert_eq!(settings.priority, JobPriority::LOWEST);
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.timeout, Duration::from_secs(60));
        assert_eq!(settings.backoff.next_delay(2), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_beats_retry_after() {
        let overrides = JobOverrides {
            retry_after: Some(Duration::from_secs(7)),
            backoff: Some(Arc::new(FixedBackoff::new(Duration::from_millis(10)))),
            max_attempts: Some(0),
            ..Default::default()
        };
        let settings = overrides.resolve(&defaults());
        assert_eq!(settings.backoff.next_delay(1), Duration::from_millis(10));
        assert_eq!(settings.max_attempts, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_distinguishable() {
        struct Slow;

        #[async_trait]
        impl JobDefinition for Slow {
            type Payload = ();
            type Error = String;
            const NAME: &'static str = "slow";

            async fn handle(&self, _payload: &(), _ctx: &JobContext) -> Result<(), String> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        }

        let job = Registered(Slow);
        let err = execute_with_timeout(&job, "null", &ctx(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Timeout { timeout_ms: 20, .. }));
    }
}
