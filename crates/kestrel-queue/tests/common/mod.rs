//! Shared fixtures for queue pipeline integration tests.
//!
//! Every fixture runs on a [`ManualClock`] so delays, leases and pruning are
//! driven by the test rather than by wall-clock time.

#![allow(dead_code)]

use async_trait::async_trait;
use kestrel_queue::{
    BackoffConfig, FailedJobRepository, JobContext, JobDefinition, JobRegistry, ManualClock,
    MemoryDriver, MemoryFailedJobRepository, QueueConfig, QueueDriver, QueueError, SqliteDriver,
    SqliteFailedJobRepository, Worker,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lease granted by `pop` in every fixture.
pub const RESERVATION_TIMEOUT: Duration = Duration::from_secs(90);

/// Storage backend under test.
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Sqlite,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Memory, Backend::Sqlite];
}

/// A driver and failed job store sharing one manual clock.
pub struct TestQueue {
    pub backend: Backend,
    pub driver: Arc<dyn QueueDriver>,
    pub failed: Arc<dyn FailedJobRepository>,
    pub clock: Arc<ManualClock>,
}

impl TestQueue {
    /// Creates a fresh, empty queue on the given backend.
    pub async fn new(backend: Backend) -> Self {
        let clock = ManualClock::starting_now();

        let (driver, failed): (Arc<dyn QueueDriver>, Arc<dyn FailedJobRepository>) = match backend {
            Backend::Memory => (
                Arc::new(MemoryDriver::new(clock.clone(), RESERVATION_TIMEOUT)),
                Arc::new(MemoryFailedJobRepository::new()),
            ),
            Backend::Sqlite => (
                Arc::new(
                    SqliteDriver::connect("sqlite::memory:", 1, RESERVATION_TIMEOUT)
                        .await
                        .expect("Failed to open SQLite queue")
                        .with_clock(clock.clone()),
                ),
                Arc::new(
                    SqliteFailedJobRepository::connect("sqlite::memory:")
                        .await
                        .expect("Failed to open SQLite failed job store"),
                ),
            ),
        };

        Self {
            backend,
            driver,
            failed,
            clock,
        }
    }

    /// Builds a single worker over this queue.
    pub fn worker(&self, registry: JobRegistry, config: &QueueConfig) -> Worker {
        Worker::new(self.driver.clone(), Arc::new(registry), self.failed.clone(), config)
            .expect("Invalid worker config")
            .with_clock(self.clock.clone())
    }
}

/// Config with a one second fixed backoff and the given attempt limit.
pub fn config(max_attempts: u32) -> QueueConfig {
    QueueConfig {
        max_attempts,
        backoff: BackoffConfig::Fixed { delay_ms: 1000 },
        ..Default::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub number: u64,
    pub customer: String,
}

pub fn invoice(number: u64) -> Invoice {
    Invoice {
        number,
        customer: format!("customer-{}", number),
    }
}

/// Counts handler runs and failure hooks.
#[derive(Debug, Default, Clone)]
pub struct Counters {
    pub runs: Arc<AtomicU32>,
    pub failures: Arc<AtomicU32>,
}

impl Counters {
    pub fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

/// Succeeds every time.
pub struct SendInvoice(pub Counters);

#[async_trait]
impl JobDefinition for SendInvoice {
    type Payload = Invoice;
    type Error = String;
    const NAME: &'static str = "send_invoice";

    async fn handle(&self, _invoice: &Invoice, _ctx: &JobContext) -> Result<(), String> {
        self.0.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails every time.
pub struct ChargeCard(pub Counters);

#[async_trait]
impl JobDefinition for ChargeCard {
    type Payload = Invoice;
    type Error = String;
    const NAME: &'static str = "charge_card";

    async fn handle(&self, invoice: &Invoice, ctx: &JobContext) -> Result<(), String> {
        self.0.runs.fetch_add(1, Ordering::SeqCst);
        Err(format!("card declined for invoice {} on attempt {}", invoice.number, ctx.attempt))
    }

    async fn on_failure(&self, _invoice: &Invoice, _ctx: &JobContext, _error: &QueueError) -> Result<(), String> {
        self.0.failures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sleeps past its own timeout.
pub struct ExportLedger(pub Counters);

#[async_trait]
impl JobDefinition for ExportLedger {
    type Payload = Invoice;
    type Error = String;
    const NAME: &'static str = "export_ledger";

    fn max_attempts(&self) -> Option<u32> {
        Some(2)
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_millis(20))
    }

    async fn handle(&self, _invoice: &Invoice, _ctx: &JobContext) -> Result<(), String> {
        self.0.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(())
    }

    async fn on_failure(&self, _invoice: &Invoice, _ctx: &JobContext, _error: &QueueError) -> Result<(), String> {
        self.0.failures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
