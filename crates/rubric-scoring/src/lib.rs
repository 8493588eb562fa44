pub mod config;
pub mod error;
pub mod scoring;
pub mod tables;
pub mod telemetry;
