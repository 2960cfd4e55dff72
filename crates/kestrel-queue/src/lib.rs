//! Kestrel Queue - Background Job Processing
//!
//! Moves deferred work out of a request and runs it in worker processes:
//! - Typed job definitions with serde payloads
//! - Pluggable drivers (memory, sync, SQLite, Redis) behind one trait
//! - Priorities 0-5, delayed jobs, and leases with crash reclaim
//! - Retries with fixed or exponential backoff
//! - A failed job store with retry, forget, flush and prune
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Kestrel Queue Architecture                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  Dispatcher ── push / later ──┐                               │
//! │                               ▼                               │
//! │  ┌────────────────────────────────────────────────────────┐   │
//! │  │          QueueDriver (memory | sync | sqlite | redis)  │   │
//! │  │   pending ──pop──▶ reserved ──▶ processing             │   │
//! │  │      ▲                               │                 │   │
//! │  │      └────────── release ────────────┤                 │   │
//! │  └──────────────────────────────────────┼─────────────────┘   │
//! │                                         │                     │
//! │  WorkerPool ── Worker × N ── JobRegistry ── JobDefinition     │
//! │                                         │                     │
//! │                      complete ◀─────────┴────▶ bury           │
//! │                                                  │            │
//! │                                  FailedJobRepository          │
//! │                                  (retry / forget / prune)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use kestrel_queue::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Email {
//!     to: String,
//! }
//!
//! struct SendEmail;
//!
//! #[async_trait::async_trait]
//! impl JobDefinition for SendEmail {
//!     type Payload = Email;
//!     type Error = String;
//!     const NAME: &'static str = "send_email";
//!
//!     async fn handle(&self, email: &Email, _ctx: &JobContext) -> Result<(), String> {
//!         println!("Sending email to {}", email.to);
//!         Ok(())
//!     }
//! }
//!
//! let registry = Arc::new(JobRegistry::new().with(SendEmail)?);
//! let driver = connect_driver(&config, registry.clone(), system_clock()).await?;
//!
//! Dispatcher::new(driver.clone(), config.default_queue_name()?)
//!     .push(&SendEmail, &Email { to: "user@example.com".into() }, PushOptions::new())
//!     .await?;
//! ```

pub mod backoff;
pub mod clock;
pub mod config;
pub mod definition;
pub mod drivers;
pub mod error;
pub mod failed;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod producer;
pub mod queue;
pub mod registry;
pub mod worker;

pub use backoff::{Backoff, BackoffConfig, ExponentialBackoff, FixedBackoff};
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use config::{DriverConfig, FailedStoreConfig, QueueConfig, RedisConfig, WorkerConfig};
pub use definition::{encode_payload, JobDefaults, JobDefinition, JobOverrides, JobSettings, RegisteredJob};
pub use drivers::{connect_driver, connect_failed_store, MemoryDriver, RedisDriver, SqliteDriver, SyncDriver};
pub use error::{QueueError, QueueResult};
pub use failed::{FailedJob, FailedJobRepository, FailedJobService, MemoryFailedJobRepository, SqliteFailedJobRepository};
pub use job::{JobContext, JobId, JobStatus, NewJob, QueuedJob};
pub use metrics::{register_metrics, QueueMetrics};
pub use producer::Dispatcher;
pub use queue::{JobPriority, PushOptions, QueueDriver, QueueName, DEFAULT_QUEUE};
pub use registry::JobRegistry;
pub use worker::{JobOutcome, Worker, WorkerPool, WorkerPoolStats};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::definition::JobDefinition;
    pub use crate::producer::Dispatcher;
    pub use crate::queue::{JobPriority, PushOptions, QueueDriver, QueueName};
    pub use crate::registry::JobRegistry;
    pub use crate::worker::{Worker, WorkerPool};
    pub use crate::{connect_driver, system_clock, JobContext, JobId, QueueConfig, QueueError, QueueResult};
    pub use std::sync::Arc;
}
