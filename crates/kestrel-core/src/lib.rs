//! # Kestrel Core
//!
//! Core error, validation, and telemetry definitions shared by every
//! Kestrel crate.

pub mod error;
pub mod result;
pub mod telemetry;
pub mod validation;

pub use error::*;
pub use result::*;
pub use telemetry::{init_telemetry, LogFormat, TelemetryConfig};
pub use validation::*;
