//! Result type aliases for Kestrel.

use crate::KestrelError;

/// A specialized `Result` type for Kestrel operations.
pub type KestrelResult<T> = Result<T, KestrelError>;
