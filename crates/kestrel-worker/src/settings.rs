//! Process settings.

use kestrel_core::TelemetryConfig;
use kestrel_queue::QueueConfig;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Everything the worker binary reads from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct WorkerSettings {
    /// Logging configuration.
    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,

    /// Queue pipeline configuration.
    #[serde(default)]
    #[validate(nested)]
    pub queue: QueueConfig,
}
