//! flowreplay library
//!
//! Exposes the configuration layer for the binary and integration tests.

pub mod config;

pub use config::{load_config, Config, LoadedConfig};
