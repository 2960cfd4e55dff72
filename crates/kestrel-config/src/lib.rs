//! # Kestrel Config
//!
//! Layered configuration loading for Kestrel.
//! Settings are read once at startup from TOML files and environment
//! variables and handed to components by value.

mod loader;

pub use loader::*;
