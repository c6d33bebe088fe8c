//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod json_config;
pub mod memory;
pub mod telemetry;
