//! Runtime glue: consumer configuration and telemetry.

pub mod config;
pub mod telemetry;
